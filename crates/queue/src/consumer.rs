//! Queue trait and delivery types.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::message::{JobMessage, PRIORITY_DEFAULT};

/// A raw delivery received from a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDelivery {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Raw message body (JSON string, see [`JobMessage`]).
    pub body: String,
    /// Provider-specific handle for ack/nack (e.g., SQS receipt handle).
    pub receipt_handle: String,
    /// When the message was sent to the queue.
    pub timestamp: DateTime<Utc>,
    /// Number of times this message has been received (for retry tracking).
    pub attempt_count: u32,
}

/// Per-message enqueue options.
#[derive(Debug, Clone, Copy)]
pub struct EnqueueOptions {
    /// Lower value = dequeued sooner. Only providers with priority
    /// support honor this; SQS standard queues ignore it.
    pub priority: u8,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self { priority: PRIORITY_DEFAULT }
    }
}

impl EnqueueOptions {
    pub fn with_priority(priority: u8) -> Self {
        Self { priority }
    }
}

/// Health status of a queue connection.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    /// Whether the queue is reachable.
    pub connected: bool,
    /// Approximate number of messages waiting in the queue.
    pub approximate_message_count: Option<u64>,
    /// Queue provider name (e.g., "sqs", "memory").
    pub provider: String,
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueHealth {{ connected: {}, messages: {:?}, provider: {} }}",
            self.connected, self.approximate_message_count, self.provider
        )
    }
}

/// Trait for import-queue backends.
///
/// Contract: at-least-once delivery with a per-message visibility/ack
/// model. Handlers must tolerate duplicate delivery; enqueueing from
/// inside a handler is allowed (the planner enqueues chunk messages
/// while handling a parent message).
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a message.
    async fn enqueue(&self, message: &JobMessage, options: EnqueueOptions)
        -> Result<(), QueueError>;

    /// Poll up to `max_messages` from the queue.
    ///
    /// May block for up to the provider's long-poll timeout (e.g., 20s
    /// for SQS). Returns an empty vec if no messages are available.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueDelivery>, QueueError>;

    /// Acknowledge successful processing — removes the message from the queue.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Negative-acknowledge — returns the message to the queue for retry.
    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Check queue connectivity and return health status.
    async fn health_check(&self) -> Result<QueueHealth, QueueError>;

    /// Approximate depth of the dead-letter queue, when the provider
    /// has one configured.
    async fn dlq_depth(&self) -> Result<Option<u64>, QueueError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_serde_roundtrip() {
        let delivery = QueueDelivery {
            id: "msg-123".to_string(),
            body: r#"{"kind":"parent","jobId":"00000000-0000-0000-0000-000000000000"}"#
                .to_string(),
            receipt_handle: "handle-abc".to_string(),
            timestamp: Utc::now(),
            attempt_count: 1,
        };

        let json = serde_json::to_string(&delivery).unwrap();
        let back: QueueDelivery = serde_json::from_str(&json).unwrap();

        assert_eq!(delivery.id, back.id);
        assert_eq!(delivery.body, back.body);
        assert_eq!(delivery.receipt_handle, back.receipt_handle);
        assert_eq!(delivery.attempt_count, back.attempt_count);
    }

    #[test]
    fn test_default_priority() {
        assert_eq!(EnqueueOptions::default().priority, PRIORITY_DEFAULT);
        assert_eq!(EnqueueOptions::with_priority(1).priority, 1);
    }

    #[test]
    fn test_queue_health_display() {
        let health = QueueHealth {
            connected: true,
            approximate_message_count: Some(42),
            provider: "memory".to_string(),
        };
        let display = format!("{}", health);
        assert!(display.contains("connected: true"));
        assert!(display.contains("42"));
    }
}
