//! Model-level errors.

use thiserror::Error;

use crate::timestamp::TimestampError;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Segment map unreadable: {0}")]
    MapIo(#[from] std::io::Error),

    #[error("Segment map could not be repaired: {diagnostic}")]
    MapUnrepairable { diagnostic: String },

    #[error("Segment map has unexpected shape: {0}")]
    MapShape(String),

    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Invalid output name: {0}")]
    InvalidName(String),
}

impl ModelError {
    pub fn unrepairable(diagnostic: impl Into<String>) -> Self {
        Self::MapUnrepairable {
            diagnostic: diagnostic.into(),
        }
    }

    /// Whether the caller supplied bad input (as opposed to an I/O problem).
    pub fn is_input_error(&self) -> bool {
        !matches!(self, ModelError::MapIo(_))
    }
}
