//! Media error type.

use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Failures of FFmpeg orchestration, downloads and tool installs.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg is not on PATH")]
    FfmpegNotFound,

    #[error("ffprobe is not on PATH")]
    FfprobeNotFound,

    #[error("ffmpeg failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("ffprobe failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("Tool install failed: {0}")]
    InstallFailed(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Cancelled by operator")]
    Cancelled,

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Unusable media: {0}")]
    InvalidMedia(String),

    #[error("No segments rendered")]
    NothingRendered,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    pub fn install_failed(message: impl Into<String>) -> Self {
        Self::InstallFailed(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }

    /// Disk, codec or tool failures that no retry inside the job will fix.
    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self,
            MediaError::FfmpegNotFound
                | MediaError::FfprobeNotFound
                | MediaError::FfmpegFailed { .. }
                | MediaError::Io(_)
                | MediaError::Timeout(_)
        )
    }
}
