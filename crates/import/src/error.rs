//! Import pipeline errors.
//!
//! `is_transient` drives the dispatcher's ack/nack decision: transient
//! errors go back on the queue, permanent ones fail the job.

use thiserror::Error;

use siphon_jobs::JobError;
use siphon_queue::QueueError;

#[derive(Debug, Error)]
pub enum ImportError {
    /// No registered strategy for the job's import type. Permanent:
    /// redelivery cannot fix a missing registration.
    #[error("unknown import strategy: {0}")]
    UnknownStrategy(String),

    /// The source file could not be read or parsed. Permanent; the
    /// upload itself is bad.
    #[error("source error: {0}")]
    Source(String),

    /// The destination store rejected a write. Transient.
    #[error("sink error: {0}")]
    Sink(String),

    /// A strategy rejected the data (missing column, bad value).
    /// Permanent.
    #[error("strategy error: {0}")]
    Strategy(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ImportError {
    pub fn is_transient(&self) -> bool {
        match self {
            ImportError::Sink(_) => true,
            ImportError::Job(e) => e.is_transient(),
            ImportError::Queue(e) => e.is_transient(),
            ImportError::UnknownStrategy(_)
            | ImportError::Source(_)
            | ImportError::Strategy(_) => false,
        }
    }
}
