//! In-memory queue backend.
//!
//! Single-process provider for tests and local development. Matches the
//! SQS semantics the rest of the system assumes: at-least-once delivery
//! (nack returns a message to the ready set with its attempt count
//! intact) and receipt-handle based acknowledgement. Messages are
//! ordered by (priority, enqueue sequence).

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::consumer::{EnqueueOptions, JobQueue, QueueDelivery, QueueHealth};
use crate::error::QueueError;
use crate::message::JobMessage;

#[derive(Debug, Clone)]
struct Pending {
    id: String,
    body: String,
    enqueued_at: DateTime<Utc>,
    attempt_count: u32,
    priority: u8,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    /// Ready messages keyed by (priority, seq) so lower priority values
    /// and earlier enqueues drain first.
    ready: BTreeMap<(u8, u64), Pending>,
    /// Polled but not yet acked, keyed by receipt handle.
    in_flight: HashMap<String, Pending>,
    next_seq: u64,
}

/// In-memory [`JobQueue`] implementation.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ready (not in-flight) messages. Test helper.
    pub fn ready_len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).ready.len()
    }

    /// Number of polled-but-unacked messages. Test helper.
    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.ready.is_empty() && inner.in_flight.is_empty()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(
        &self,
        message: &JobMessage,
        options: EnqueueOptions,
    ) -> Result<(), QueueError> {
        let body = message.encode()?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.ready.insert(
            (options.priority, seq),
            Pending {
                id: Uuid::new_v4().to_string(),
                body,
                enqueued_at: Utc::now(),
                attempt_count: 0,
                priority: options.priority,
                seq,
            },
        );
        Ok(())
    }

    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueDelivery>, QueueError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<(u8, u64)> = inner
            .ready
            .keys()
            .take(max_messages as usize)
            .copied()
            .collect();

        let mut deliveries = Vec::with_capacity(keys.len());
        for key in keys {
            let mut pending = match inner.ready.remove(&key) {
                Some(p) => p,
                None => continue,
            };
            pending.attempt_count += 1;
            let receipt_handle = Uuid::new_v4().to_string();
            deliveries.push(QueueDelivery {
                id: pending.id.clone(),
                body: pending.body.clone(),
                receipt_handle: receipt_handle.clone(),
                timestamp: pending.enqueued_at,
                attempt_count: pending.attempt_count,
            });
            inner.in_flight.insert(receipt_handle, pending);
        }
        Ok(deliveries)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .in_flight
            .remove(receipt_handle)
            .map(|_| ())
            .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle: {receipt_handle}")))
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let pending = inner
            .in_flight
            .remove(receipt_handle)
            .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle: {receipt_handle}")))?;
        inner.ready.insert((pending.priority, pending.seq), pending);
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(QueueHealth {
            connected: true,
            approximate_message_count: Some((inner.ready.len() + inner.in_flight.len()) as u64),
            provider: "memory".to_string(),
        })
    }
}
