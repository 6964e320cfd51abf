//! Filesystem helpers shared by the renderer, downloader and delivery.

use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::MediaResult;

/// EXDEV on Linux and macOS.
const CROSS_DEVICE: i32 = 18;

/// Move a file, falling back to copy-and-delete across filesystems.
///
/// The destination's parent directory is created when missing. Cross-device
/// copies land in a sibling temp file first and are renamed into place.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE) => {
            debug!(src = %src.display(), dst = %dst.display(), "Cross-device move, copying");
            let staging = dst.with_extension("partial");
            if let Err(e) = fs::copy(src, &staging).await {
                remove_if_exists(&staging).await;
                return Err(e.into());
            }
            if let Err(e) = fs::rename(&staging, dst).await {
                remove_if_exists(&staging).await;
                return Err(e.into());
            }
            remove_if_exists(src).await;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Remove a file, ignoring "not found" and logging anything else.
///
/// Returns whether a file was actually removed.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
            false
        }
    }
}
