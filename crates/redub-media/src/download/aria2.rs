//! aria2c process driver.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use redub_models::CancelToken;

use super::{DownloaderSettings, Throttle, TransferObserver};
use crate::error::{MediaError, MediaResult};
use crate::progress::transfer_status;

const TITLE: &str = "Downloading (aria2c)";

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\((\d{1,3})%\)").expect("percent pattern is a valid regex"))
}

/// Extract the `(<n>%)` figure from an aria2c summary line.
pub fn parse_percent(line: &str) -> Option<u8> {
    percent_pattern()
        .captures(line)
        .and_then(|caps| caps[1].parse::<u8>().ok())
        .filter(|p| *p <= 100)
}

/// Command-line arguments for one download.
pub fn build_args(url: &Url, dest: &Path, settings: &DownloaderSettings) -> Vec<String> {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string());
    let connections = settings.connections.clamp(1, 16).to_string();

    let mut args = vec![
        url.to_string(),
        "-o".to_string(),
        name,
        "-d".to_string(),
        dir,
        "-x".to_string(),
        connections.clone(),
        "-s".to_string(),
        connections,
        "-k".to_string(),
        "1M".to_string(),
        "--user-agent".to_string(),
        settings.user_agent.clone(),
    ];
    if !settings.check_certificate {
        args.push("--check-certificate=false".to_string());
    }
    args.push("--summary-interval".to_string());
    args.push("1".to_string());
    args
}

/// Run aria2c to completion, forwarding throttled progress.
///
/// The token is polled before every output read; raising it kills the child.
pub async fn run(
    binary: &Path,
    url: &Url,
    dest: &Path,
    settings: &DownloaderSettings,
    cancel: &CancelToken,
    observer: &dyn TransferObserver,
    started: Instant,
) -> MediaResult<()> {
    let args = build_args(url, dest, settings);
    debug!("Running aria2c: {} {}", binary.display(), args.join(" "));

    let mut child = Command::new(binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MediaError::download_failed(format!("aria2c failed to launch: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MediaError::internal("aria2c stdout not captured"))?;
    let mut lines = BufReader::new(stdout).lines();
    let mut throttle = Throttle::new(settings.progress_interval);

    loop {
        if cancel.is_cancelled() {
            info!("aria2c cancelled, killing process");
            let _ = child.kill().await;
            return Err(MediaError::Cancelled);
        }

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = cancel.cancelled() => continue,
        };

        let Some(line) = line else { break };
        if let Some(percent) = parse_percent(&line) {
            if throttle.ready() {
                let text = transfer_status(TITLE, percent as f64, started.elapsed(), None);
                observer.on_progress(text, percent as f64).await;
            }
        }
    }

    let status = child.wait().await?;
    if status.success() {
        Ok(())
    } else {
        Err(MediaError::download_failed(format!(
            "aria2c exited with {}",
            status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "a signal".to_string())
        )))
    }
}
