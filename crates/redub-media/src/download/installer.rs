//! aria2c lookup and auto-install.
//!
//! Lookup order: `PATH`, then anything already unpacked under the tool
//! directory, then a fresh install from the configured release archive.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use reqwest::Client;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::DownloaderSettings;
use crate::error::{MediaError, MediaResult};

#[cfg(windows)]
pub const BINARY_NAME: &str = "aria2c.exe";
#[cfg(not(windows))]
pub const BINARY_NAME: &str = "aria2c";

/// Find aria2c or install it.
pub async fn ensure_aria2(client: &Client, settings: &DownloaderSettings) -> MediaResult<PathBuf> {
    if let Ok(path) = which::which("aria2c") {
        return Ok(path);
    }

    let tool_dir = settings.tool_dir.clone();
    if let Some(path) = tokio::task::spawn_blocking(move || find_binary(&tool_dir, BINARY_NAME))
        .await
        .map_err(|e| MediaError::internal(e.to_string()))?
    {
        return Ok(path);
    }

    let Some(release_url) = settings.release_url.as_deref() else {
        return Err(MediaError::install_failed(
            "aria2c not found and no release archive configured",
        ));
    };

    warn!("aria2c not found, installing from {}", release_url);
    install_from_release(client, release_url, &settings.tool_dir).await
}

/// Download a zip release and unpack its aria2c into `tool_dir`.
pub async fn install_from_release(
    client: &Client,
    release_url: &str,
    tool_dir: &Path,
) -> MediaResult<PathBuf> {
    let response = client.get(release_url).send().await?;
    if !response.status().is_success() {
        return Err(MediaError::install_failed(format!(
            "release download returned HTTP {}",
            response.status()
        )));
    }
    let archive = response.bytes().await?.to_vec();

    let target = tool_dir.to_path_buf();
    let binary = tokio::task::spawn_blocking(move || unpack_binary(archive, &target, BINARY_NAME))
        .await
        .map_err(|e| MediaError::internal(e.to_string()))??;

    info!(path = %binary.display(), "aria2c installed");
    Ok(binary)
}

/// Extract `archive` into `target_dir`, locate `name` and mark it executable.
pub fn unpack_binary(archive: Vec<u8>, target_dir: &Path, name: &str) -> MediaResult<PathBuf> {
    std::fs::create_dir_all(target_dir)?;
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    zip.extract(target_dir)?;

    let binary = find_binary(target_dir, name)
        .ok_or_else(|| MediaError::install_failed(format!("{} not found in archive", name)))?;
    make_executable(&binary)?;
    Ok(binary)
}

/// Recursively search `dir` for a file called `name`.
pub fn find_binary(dir: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name().to_string_lossy() == name)
        .map(|entry| entry.into_path())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> MediaResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> MediaResult<()> {
    Ok(())
}
