//! Resilient downloader.
//!
//! The primary strategy is a multi-connection `aria2c` process writing straight
//! to the destination. When aria2c is missing (and cannot be installed), fails
//! to launch or exits non-zero, exactly one single-connection streamed HTTP GET
//! is attempted instead. Callers only learn whether a strategy succeeded: no
//! error escapes, and a failed download never leaves a partial file behind.

pub mod aria2;
pub mod http;
pub mod installer;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use redub_models::CancelToken;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::remove_if_exists;

/// Default aria2c connection count (`-x` / `-s`).
pub const DEFAULT_CONNECTIONS: u32 = 16;
/// Default HTTP fallback write chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
/// Default minimum gap between progress updates.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(4);
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Downloader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderSettings {
    pub connections: u32,
    pub user_agent: String,
    pub check_certificate: bool,
    /// Explicit aria2c binary; skips lookup and install when set
    pub aria2_binary: Option<PathBuf>,
    /// Where an installed aria2c lives
    pub tool_dir: PathBuf,
    /// Zip archive containing an aria2c binary
    pub release_url: Option<String>,
    pub chunk_size: usize,
    pub http_timeout_secs: u64,
    pub progress_interval: Duration,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            connections: DEFAULT_CONNECTIONS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            check_certificate: true,
            aria2_binary: None,
            tool_dir: PathBuf::from("tools"),
            release_url: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            http_timeout_secs: 3600,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Which strategy produced the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStrategy {
    Aria2,
    Http,
}

impl DownloadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStrategy::Aria2 => "aria2",
            DownloadStrategy::Http => "http",
        }
    }
}

/// Receives throttled progress text while a transfer runs.
#[async_trait]
pub trait TransferObserver: Send + Sync {
    async fn on_progress(&self, status_text: String, percent: f64);
}

/// Observer that discards updates.
pub struct NoopObserver;

#[async_trait]
impl TransferObserver for NoopObserver {
    async fn on_progress(&self, _status_text: String, _percent: f64) {}
}

/// Rate limiter for progress updates. The first update always passes.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// aria2c with a single-shot HTTP fallback.
pub struct ResilientDownloader {
    settings: DownloaderSettings,
    client: reqwest::Client,
}

impl ResilientDownloader {
    pub fn new(settings: DownloaderSettings) -> MediaResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .danger_accept_invalid_certs(!settings.check_certificate)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &DownloaderSettings {
        &self.settings
    }

    /// Download `url` to `dest`.
    ///
    /// Returns the strategy that succeeded, or `None` when every strategy
    /// failed or the token was raised.
    pub async fn download(
        &self,
        url: &Url,
        dest: &Path,
        cancel: &CancelToken,
        observer: &dyn TransferObserver,
    ) -> Option<DownloadStrategy> {
        if let Err(e) = prepare_destination(dest).await {
            warn!(dest = %dest.display(), error = %e, "Cannot prepare download destination");
            return None;
        }

        let started = Instant::now();

        match self.try_aria2(url, dest, cancel, observer, started).await {
            Ok(()) => return self.finish(DownloadStrategy::Aria2, dest).await,
            Err(MediaError::Cancelled) => {
                info!("Download cancelled");
                discard_partial(dest).await;
                return None;
            }
            Err(e) => {
                warn!(error = %e, "aria2c download failed, falling back to HTTP");
                record(DownloadStrategy::Aria2, "failed");
                discard_partial(dest).await;
            }
        }

        if cancel.is_cancelled() {
            return None;
        }

        let fetched = http::fetch(
            &self.client,
            url,
            dest,
            self.settings.chunk_size,
            self.settings.progress_interval,
            cancel,
            observer,
            started,
        )
        .await;

        match fetched {
            Ok(bytes) => {
                info!(bytes, "HTTP fallback download complete");
                self.finish(DownloadStrategy::Http, dest).await
            }
            Err(e) => {
                warn!(error = %e, "HTTP fallback download failed");
                record(DownloadStrategy::Http, if e.is_cancelled() { "cancelled" } else { "failed" });
                discard_partial(dest).await;
                None
            }
        }
    }

    async fn try_aria2(
        &self,
        url: &Url,
        dest: &Path,
        cancel: &CancelToken,
        observer: &dyn TransferObserver,
        started: Instant,
    ) -> MediaResult<()> {
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        let binary = match &self.settings.aria2_binary {
            Some(path) => path.clone(),
            None => installer::ensure_aria2(&self.client, &self.settings).await?,
        };
        aria2::run(&binary, url, dest, &self.settings, cancel, observer, started).await
    }

    async fn finish(&self, strategy: DownloadStrategy, dest: &Path) -> Option<DownloadStrategy> {
        match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                record(strategy, "success");
                Some(strategy)
            }
            _ => {
                warn!(strategy = strategy.as_str(), dest = %dest.display(), "Download reported success but file is missing or empty");
                record(strategy, "failed");
                discard_partial(dest).await;
                None
            }
        }
    }
}

fn record(strategy: DownloadStrategy, outcome: &'static str) {
    metrics::counter!("redub_downloads_total", "strategy" => strategy.as_str(), "outcome" => outcome)
        .increment(1);
}

async fn prepare_destination(dest: &Path) -> MediaResult<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    discard_partial(dest).await;
    Ok(())
}

/// Remove the destination and aria2's control file.
async fn discard_partial(dest: &Path) {
    remove_if_exists(dest).await;
    let mut control = dest.as_os_str().to_owned();
    control.push(".aria2");
    remove_if_exists(PathBuf::from(control)).await;
}
