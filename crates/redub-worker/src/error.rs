//! Worker error types.

use thiserror::Error;

use redub_media::MediaError;
use redub_models::ModelError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self::Synthesis(msg.into())
    }
}

/// Why a job ended early. Every variant maps to one terminal user message.
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed map beyond repair, missing video, invalid link.
    #[error("Input error: {0}")]
    Input(String),

    /// Every download strategy was exhausted.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Synthesis produced nothing usable for the whole job.
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Nothing could be rendered.
    #[error("Render error: {0}")]
    Render(String),

    #[error("Stopped by operator")]
    Cancelled,

    /// Disk or codec failure during encode or merge.
    #[error("Resource error: {0}")]
    Resource(String),
}

impl JobError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }

    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Input(_) => "input",
            JobError::Transfer(_) => "transfer",
            JobError::Synthesis(_) => "synthesis",
            JobError::Render(_) => "render",
            JobError::Cancelled => "cancelled",
            JobError::Resource(_) => "resource",
        }
    }

    /// The single terminal message shown to the submitter.
    pub fn user_message(&self) -> String {
        match self {
            JobError::Cancelled => "🛑 Job stopped by operator.".to_string(),
            JobError::Input(msg) => format!("❌ Invalid input: {}", msg),
            JobError::Transfer(msg) => format!("❌ Could not fetch the video: {}", msg),
            JobError::Synthesis(msg) => format!("❌ Narration failed: {}", msg),
            JobError::Render(msg) => format!("❌ Rendering failed: {}", msg),
            JobError::Resource(msg) => format!("❌ Processing error: {}", msg),
        }
    }
}

impl From<MediaError> for JobError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => JobError::Cancelled,
            MediaError::NothingRendered => JobError::Render("no segments rendered".to_string()),
            MediaError::DownloadFailed { message } => JobError::Transfer(message),
            MediaError::FileNotFound(path) => {
                JobError::Input(format!("file not found: {}", path.display()))
            }
            MediaError::InvalidMedia(msg) => JobError::Input(msg),
            other => JobError::Resource(other.to_string()),
        }
    }
}

impl From<ModelError> for JobError {
    fn from(err: ModelError) -> Self {
        if err.is_input_error() {
            JobError::Input(err.to_string())
        } else {
            JobError::Resource(err.to_string())
        }
    }
}

impl From<WorkerError> for JobError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Media(e) => e.into(),
            WorkerError::Model(e) => e.into(),
            other => JobError::Resource(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_errors_map_to_taxonomy() {
        assert!(JobError::from(MediaError::Cancelled).is_cancelled());
        assert!(matches!(JobError::from(MediaError::NothingRendered), JobError::Render(_)));
        assert!(matches!(
            JobError::from(MediaError::download_failed("404")),
            JobError::Transfer(_)
        ));
        assert!(matches!(
            JobError::from(MediaError::ffmpeg_failed("codec", None, Some(1))),
            JobError::Resource(_)
        ));
    }

    #[test]
    fn test_model_errors_are_input() {
        let err = JobError::from(ModelError::unrepairable("EOF while parsing"));
        assert!(matches!(err, JobError::Input(_)));
        assert!(err.user_message().contains("EOF while parsing"));
    }

    #[test]
    fn test_cancel_message_is_distinct() {
        let stopped = JobError::Cancelled.user_message();
        assert!(stopped.contains("stopped by operator"));
        assert!(!JobError::resource("disk full").user_message().contains("stopped"));
    }

    #[test]
    fn test_worker_error_unwraps_media() {
        let err: JobError = WorkerError::from(MediaError::Cancelled).into();
        assert!(err.is_cancelled());
        assert_eq!(JobError::transfer("x").kind(), "transfer");
    }
}
