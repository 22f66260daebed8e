//! Job store error types.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    /// Bad input to a store operation. Not retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// An illegal state transition was attempted. Indicates a caller
    /// bug; not retried.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("import job not found: {0}")]
    NotFound(Uuid),

    /// The backing store is unavailable. Left to the queue's
    /// redelivery mechanism to retry.
    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl JobError {
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Store(_))
    }
}

impl From<sqlx::Error> for JobError {
    fn from(e: sqlx::Error) -> Self {
        JobError::Store(e.to_string())
    }
}
