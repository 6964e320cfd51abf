//! Worker configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use redub_media::download::{
    DownloaderSettings, DEFAULT_CHUNK_SIZE, DEFAULT_CONNECTIONS, DEFAULT_USER_AGENT,
};
use redub_media::fit::{FitThresholds, DEFAULT_MIN_CLIP_SECS, DEFAULT_SPEED_LIMIT};
use redub_media::batch::{RenderSettings, DEFAULT_BATCH_SIZE};
use redub_models::encoding::{
    DEFAULT_AUDIO_CODEC, DEFAULT_FPS, DEFAULT_PRESET, DEFAULT_THREADS, DEFAULT_VIDEO_CODEC,
};
use redub_models::EncodingConfig;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root for per-job scratch directories
    pub work_dir: PathBuf,
    /// Where the console transport drops finished videos
    pub output_dir: PathBuf,
    /// Where the collector persists incoming maps
    pub inbox_dir: PathBuf,
    /// How often the aggregator pushes render progress
    pub aggregator_interval: Duration,
    /// Report synthesis progress every this many segments
    pub synthesis_report_every: usize,
    pub render: RenderConfig,
    pub downloader: DownloaderConfig,
    pub tts: TtsConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/redub"),
            output_dir: PathBuf::from("outputs"),
            inbox_dir: PathBuf::from("downloads"),
            aggregator_interval: Duration::from_secs(3),
            synthesis_report_every: 3,
            render: RenderConfig::default(),
            downloader: DownloaderConfig::default(),
            tts: TtsConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            work_dir: PathBuf::from(env_string("REDUB_WORK_DIR", "/tmp/redub")),
            output_dir: PathBuf::from(env_string("REDUB_OUTPUT_DIR", "outputs")),
            inbox_dir: PathBuf::from(env_string("REDUB_INBOX_DIR", "downloads")),
            aggregator_interval: Duration::from_secs(env_parse("REDUB_PROGRESS_INTERVAL_SECS", 3)),
            synthesis_report_every: env_parse::<usize>("REDUB_SYNTH_REPORT_EVERY", 3).max(1),
            render: RenderConfig::from_env(),
            downloader: DownloaderConfig::from_env(),
            tts: TtsConfig::from_env(),
        }
    }
}

/// Batch renderer tuning.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub batch_size: usize,
    /// Ratios up to this are slowed down, above it looped
    pub speed_limit: f64,
    pub min_clip_secs: f64,
    pub video_codec: String,
    pub preset: String,
    pub audio_codec: String,
    pub fps: u32,
    pub threads: u32,
    /// Per-batch encode timeout, 0 disables
    pub encode_timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            speed_limit: DEFAULT_SPEED_LIMIT,
            min_clip_secs: DEFAULT_MIN_CLIP_SECS,
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            fps: DEFAULT_FPS,
            threads: DEFAULT_THREADS,
            encode_timeout_secs: 0,
        }
    }
}

impl RenderConfig {
    pub fn from_env() -> Self {
        Self {
            batch_size: env_parse::<usize>("REDUB_BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            speed_limit: env_parse::<f64>("REDUB_SPEED_LIMIT", DEFAULT_SPEED_LIMIT).max(1.0),
            min_clip_secs: env_parse::<f64>("REDUB_MIN_CLIP_SECS", DEFAULT_MIN_CLIP_SECS).max(0.0),
            video_codec: env_string("REDUB_VIDEO_CODEC", DEFAULT_VIDEO_CODEC),
            preset: env_string("REDUB_PRESET", DEFAULT_PRESET),
            audio_codec: env_string("REDUB_AUDIO_CODEC", DEFAULT_AUDIO_CODEC),
            fps: env_parse("REDUB_FPS", DEFAULT_FPS),
            threads: env_parse("REDUB_THREADS", DEFAULT_THREADS),
            encode_timeout_secs: env_parse("REDUB_ENCODE_TIMEOUT_SECS", 0),
        }
    }

    pub fn to_settings(&self) -> RenderSettings {
        RenderSettings {
            batch_size: self.batch_size,
            thresholds: FitThresholds {
                speed_limit: self.speed_limit,
                min_clip_secs: self.min_clip_secs,
            },
            encoding: EncodingConfig {
                codec: self.video_codec.clone(),
                preset: self.preset.clone(),
                audio_codec: self.audio_codec.clone(),
                fps: self.fps,
                threads: self.threads,
            }
            .with_threads(self.threads),
            timeout_secs: (self.encode_timeout_secs > 0).then_some(self.encode_timeout_secs),
        }
    }
}

/// Downloader tuning.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub connections: u32,
    pub user_agent: String,
    pub check_certificate: bool,
    pub aria2_binary: Option<PathBuf>,
    pub tool_dir: PathBuf,
    pub release_url: Option<String>,
    pub chunk_size: usize,
    pub http_timeout_secs: u64,
    pub progress_interval: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        let settings = DownloaderSettings::default();
        Self {
            connections: settings.connections,
            user_agent: settings.user_agent,
            check_certificate: settings.check_certificate,
            aria2_binary: settings.aria2_binary,
            tool_dir: settings.tool_dir,
            release_url: settings.release_url,
            chunk_size: settings.chunk_size,
            http_timeout_secs: settings.http_timeout_secs,
            progress_interval: settings.progress_interval,
        }
    }
}

impl DownloaderConfig {
    pub fn from_env() -> Self {
        Self {
            connections: env_parse("ARIA2_CONNECTIONS", DEFAULT_CONNECTIONS),
            user_agent: env_string("DOWNLOAD_USER_AGENT", DEFAULT_USER_AGENT),
            check_certificate: env_parse("DOWNLOAD_CHECK_CERTIFICATE", true),
            aria2_binary: env_optional("ARIA2_BINARY").map(PathBuf::from),
            tool_dir: PathBuf::from(env_string("REDUB_TOOL_DIR", "tools")),
            release_url: env_optional("ARIA2_RELEASE_URL"),
            chunk_size: env_parse("DOWNLOAD_CHUNK_BYTES", DEFAULT_CHUNK_SIZE).max(1024),
            http_timeout_secs: env_parse("DOWNLOAD_HTTP_TIMEOUT_SECS", 3600),
            progress_interval: Duration::from_secs(env_parse("DOWNLOAD_PROGRESS_INTERVAL_SECS", 4)),
        }
    }

    pub fn to_settings(&self) -> DownloaderSettings {
        DownloaderSettings {
            connections: self.connections,
            user_agent: self.user_agent.clone(),
            check_certificate: self.check_certificate,
            aria2_binary: self.aria2_binary.clone(),
            tool_dir: self.tool_dir.clone(),
            release_url: self.release_url.clone(),
            chunk_size: self.chunk_size,
            http_timeout_secs: self.http_timeout_secs,
            progress_interval: self.progress_interval,
        }
    }
}

pub const DEFAULT_TTS_ENDPOINT: &str = "https://api.sarvam.ai/text-to-speech";

/// Text-to-speech provider settings.
#[derive(Clone)]
pub struct TtsConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub language: String,
    pub speaker: String,
    pub model: String,
    pub timeout: Duration,
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("language", &self.language)
            .field("speaker", &self.speaker)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_TTS_ENDPOINT.to_string(),
            api_key: None,
            language: "hi-IN".to_string(),
            speaker: "shubh".to_string(),
            model: "bulbul:v3-beta".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl TtsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: env_string("TTS_ENDPOINT", &defaults.endpoint),
            api_key: env_optional("SARVAM_API_KEY"),
            language: env_string("TTS_LANGUAGE", &defaults.language),
            speaker: env_string("TTS_SPEAKER", &defaults.speaker),
            model: env_string("TTS_MODEL", &defaults.model),
            timeout: Duration::from_secs(env_parse("TTS_TIMEOUT_SECS", 60)),
        }
    }
}
