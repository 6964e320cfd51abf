//! Single-connection streamed HTTP fallback.

use std::path::Path;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;
use url::Url;

use redub_models::CancelToken;

use super::{Throttle, TransferObserver};
use crate::error::{MediaError, MediaResult};
use crate::progress::transfer_status;

const TITLE: &str = "Downloading (direct)";

/// Stream `url` into `dest`, flushing in `chunk_size` blocks.
///
/// Anything but `200 OK` is a failure. The token is checked before every read.
/// Returns the number of bytes written.
#[allow(clippy::too_many_arguments)]
pub async fn fetch(
    client: &Client,
    url: &Url,
    dest: &Path,
    chunk_size: usize,
    progress_interval: Duration,
    cancel: &CancelToken,
    observer: &dyn TransferObserver,
    started: Instant,
) -> MediaResult<u64> {
    if cancel.is_cancelled() {
        return Err(MediaError::Cancelled);
    }

    let response = client.get(url.clone()).send().await?;
    if response.status() != StatusCode::OK {
        return Err(MediaError::download_failed(format!(
            "HTTP {} from {}",
            response.status(),
            url.host_str().unwrap_or("server")
        )));
    }

    let total = response.content_length().filter(|len| *len > 0);
    debug!(total_bytes = ?total, "HTTP fallback streaming");

    let file = tokio::fs::File::create(dest).await?;
    let mut writer = BufWriter::with_capacity(chunk_size.max(8 * 1024), file);
    let mut stream = response.bytes_stream();
    let mut throttle = Throttle::new(progress_interval);
    let mut written: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let next = tokio::select! {
            next = stream.next() => next,
            _ = cancel.cancelled() => continue,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;

        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;

        if throttle.ready() {
            let percent = total
                .map(|t| (written as f64 / t as f64 * 100.0).min(100.0))
                .unwrap_or(0.0);
            let text = transfer_status(TITLE, percent, started.elapsed(), Some((written, total)));
            observer.on_progress(text, percent).await;
        }
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;

    if let Some(total) = total {
        if written < total {
            return Err(MediaError::download_failed(format!(
                "connection closed after {} of {} bytes",
                written, total
            )));
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::NoopObserver;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client() -> Client {
        Client::builder()
            .user_agent("redub-test")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_streams_body_to_file() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        Mock::given(method("GET"))
            .and(path("/big.mp4"))
            .and(header("user-agent", "redub-test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("big.mp4");
        let url = Url::parse(&format!("{}/big.mp4", server.uri())).unwrap();

        let written = fetch(
            &client().await,
            &url,
            &dest,
            1024 * 1024,
            Duration::ZERO,
            &CancelToken::new(),
            &NoopObserver,
            Instant::now(),
        )
        .await
        .unwrap();

        assert_eq!(written, body.len() as u64);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_non_ok_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"partial".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("v.mp4");
        let url = Url::parse(&format!("{}/v.mp4", server.uri())).unwrap();

        let err = fetch(
            &client().await,
            &url,
            &dest,
            1024,
            Duration::ZERO,
            &CancelToken::new(),
            &NoopObserver,
            Instant::now(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MediaError::DownloadFailed { .. }));
        assert!(!dest.exists());
    }
}
