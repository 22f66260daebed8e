pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod sqs;

pub use consumer::{EnqueueOptions, JobQueue, QueueDelivery, QueueHealth};
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use message::{JobMessage, PRIORITY_CHUNKED_INGEST, PRIORITY_DEFAULT};
pub use sqs::SqsQueue;
