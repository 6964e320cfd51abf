//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("Job handler aborted: {0}")]
    HandlerAborted(String),
}

impl QueueError {
    pub(crate) fn from_join(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            let payload = err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Self::HandlerPanicked(message)
        } else {
            Self::HandlerAborted(err.to_string())
        }
    }
}
