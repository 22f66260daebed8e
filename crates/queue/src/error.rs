//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("message encode error: {0}")]
    Encode(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("enqueue error: {0}")]
    Enqueue(String),

    #[error("acknowledge error: {0}")]
    Ack(String),

    #[error("queue not found: {0}")]
    NotFound(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl QueueError {
    /// Whether redelivery can plausibly fix this error.
    ///
    /// Parse errors are permanent (the body will not change); everything
    /// else is a provider/transport condition worth retrying.
    pub fn is_transient(&self) -> bool {
        !matches!(self, QueueError::Parse(_) | QueueError::Encode(_))
    }
}
