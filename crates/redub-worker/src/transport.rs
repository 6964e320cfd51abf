//! Chat transport seam.
//!
//! The pipeline only ever talks to the outside world through [`Transport`]:
//! status text, final delivery, and fetching media the submitter uploaded.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use redub_media::download::{Throttle, TransferObserver, DEFAULT_CHUNK_SIZE, DEFAULT_PROGRESS_INTERVAL};
use redub_media::{move_file, transfer_status};

use crate::error::{WorkerError, WorkerResult};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Show `text` at `handle` (a chat, or a status message to edit).
    async fn notify(&self, handle: &str, text: &str) -> WorkerResult<()>;

    /// Hand a finished file to `destination`.
    async fn deliver(
        &self,
        destination: &str,
        file: &Path,
        thumbnail: Option<&Path>,
        caption: &str,
        progress: &dyn TransferObserver,
    ) -> WorkerResult<()>;

    /// Fetch inbound media identified by `handle` into `dest`.
    async fn fetch_media(
        &self,
        handle: &str,
        dest: &Path,
        progress: &dyn TransferObserver,
    ) -> WorkerResult<()>;
}

/// Local transport for the console binary.
///
/// Notifications go to stdout, deliveries are moved into `output_dir`, and
/// inbound media handles are plain file paths.
pub struct ConsoleTransport {
    output_dir: PathBuf,
}

impl ConsoleTransport {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    async fn print(&self, line: &str) -> WorkerResult<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn notify(&self, handle: &str, text: &str) -> WorkerResult<()> {
        self.print(&format!("[{}] {}", handle, text)).await
    }

    async fn deliver(
        &self,
        destination: &str,
        file: &Path,
        thumbnail: Option<&Path>,
        caption: &str,
        progress: &dyn TransferObserver,
    ) -> WorkerResult<()> {
        let name = file
            .file_name()
            .ok_or_else(|| WorkerError::transport("delivery has no file name"))?;
        let target = self.output_dir.join(name);

        progress
            .on_progress(transfer_status("Uploading", 0.0, Default::default(), None), 0.0)
            .await;
        move_file(file, &target).await?;

        if let Some(thumb) = thumbnail {
            let thumb_target = target.with_extension("jpg");
            move_file(thumb, &thumb_target).await?;
        }

        info!(destination, path = %target.display(), "Delivered output");
        self.print(&format!("[{}] {}\n    -> {}", destination, caption, target.display()))
            .await
    }

    async fn fetch_media(
        &self,
        handle: &str,
        dest: &Path,
        progress: &dyn TransferObserver,
    ) -> WorkerResult<()> {
        let source = Path::new(handle);
        let total = tokio::fs::metadata(source)
            .await
            .map_err(|e| WorkerError::transport(format!("cannot read {}: {}", handle, e)))?
            .len();

        let result = copy_with_progress(source, dest, total, progress).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }
}

async fn copy_with_progress(
    source: &Path,
    dest: &Path,
    total: u64,
    progress: &dyn TransferObserver,
) -> WorkerResult<()> {
    let started = Instant::now();
    let mut reader = tokio::fs::File::open(source).await?;
    let mut writer = tokio::fs::File::create(dest).await?;
    let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];
    let mut throttle = Throttle::new(DEFAULT_PROGRESS_INTERVAL);
    let mut copied: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;

        if throttle.ready() {
            let percent = if total > 0 {
                copied as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            let text = transfer_status("Receiving video", percent, started.elapsed(), Some((copied, Some(total))));
            progress.on_progress(text, percent).await;
        }
    }

    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use redub_media::NoopObserver;

    #[tokio::test]
    async fn test_fetch_media_copies_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("upload.mp4");
        let dest = dir.path().join("job").join("input.mp4");
        tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
        tokio::fs::write(&source, vec![1u8; 3000]).await.unwrap();

        let transport = ConsoleTransport::new(dir.path().join("out"));
        transport
            .fetch_media(source.to_str().unwrap(), &dest, &NoopObserver)
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap().len(), 3000);
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_fetch_missing_media_fails() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ConsoleTransport::new(dir.path());
        let err = transport
            .fetch_media("/nonexistent/upload.mp4", &dir.path().join("in.mp4"), &NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Transport(_)));
    }

    #[tokio::test]
    async fn test_deliver_moves_into_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("My_Video.mp4");
        let thumb = dir.path().join("thumb.jpg");
        tokio::fs::write(&file, b"video").await.unwrap();
        tokio::fs::write(&thumb, b"jpeg").await.unwrap();

        let out = dir.path().join("outputs");
        let transport = ConsoleTransport::new(&out);
        transport
            .deliver("alice", &file, Some(&thumb), "My_Video is ready!", &NoopObserver)
            .await
            .unwrap();

        assert!(out.join("My_Video.mp4").exists());
        assert!(out.join("My_Video.jpg").exists());
        assert!(!file.exists());
    }
}
