//! Text-to-speech client.

use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TtsConfig;
use crate::error::{WorkerError, WorkerResult};

/// Turns narration text into an audio file.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Write synthesized speech for `text` to `target`.
    ///
    /// On error nothing is left at `target`.
    async fn synthesize(&self, text: &str, target: &Path) -> WorkerResult<()>;
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    target_language_code: &'a str,
    speaker: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    audios: Vec<String>,
}

/// JSON-over-HTTP provider returning base64 audio.
pub struct HttpSynthesizer {
    client: Client,
    config: TtsConfig,
}

impl HttpSynthesizer {
    pub fn new(config: TtsConfig) -> WorkerResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn request_audio(&self, text: &str) -> WorkerResult<Vec<u8>> {
        let body = SynthesisRequest {
            text,
            target_language_code: &self.config.language,
            speaker: &self.config.speaker,
            model: &self.config.model,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("api-subscription-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(WorkerError::synthesis(format!(
                "provider returned {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: SynthesisResponse = response.json().await?;
        let encoded = parsed
            .audios
            .into_iter()
            .next()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| WorkerError::synthesis("provider returned no audio"))?;

        STANDARD
            .decode(encoded.trim())
            .map_err(|e| WorkerError::synthesis(format!("invalid audio payload: {}", e)))
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, target: &Path) -> WorkerResult<()> {
        let audio = self.request_audio(text).await?;
        debug!(bytes = audio.len(), target = %target.display(), "Synthesized narration");

        // Write beside the target and rename so a crash never leaves a truncated cache entry.
        let staging = target.with_extension("part");
        if let Err(e) = tokio::fs::write(&staging, &audio).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&staging, target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: String) -> TtsConfig {
        TtsConfig {
            endpoint,
            api_key: Some("test-key".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_writes_decoded_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("api-subscription-key", "test-key"))
            .and(body_partial_json(json!({
                "text": "namaste",
                "target_language_code": "hi-IN",
                "speaker": "shubh",
                "model": "bulbul:v3-beta"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "audios": [STANDARD.encode(b"RIFF....WAVE")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("audio_1.wav");
        let tts = HttpSynthesizer::new(config(server.uri())).unwrap();
        tts.synthesize("namaste", &target).await.unwrap();

        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"RIFF....WAVE");
        assert!(!target.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_provider_error_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("audio_2.wav");
        let tts = HttpSynthesizer::new(config(server.uri())).unwrap();

        let err = tts.synthesize("text", &target).await.unwrap_err();
        assert!(err.to_string().contains("429"));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_empty_or_invalid_audio_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"audios": []})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"audios": ["%%%"]})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tts = HttpSynthesizer::new(config(server.uri())).unwrap();

        let target = dir.path().join("a.wav");
        assert!(tts.synthesize("x", &target).await.is_err());
        assert!(tts.synthesize("x", &target).await.is_err());
        assert!(!target.exists());
    }
}
