//! Import-job queue message contracts.
//!
//! Two message shapes travel through the queue: a `parent` message that
//! only names a job, and `chunk` messages produced by the planner. All
//! planning state lives on the job row, so a parent message never needs
//! more than the id; a chunk message must fully determine its input on
//! its own (plus the job's planning metadata).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Default enqueue priority (lower value = dequeued sooner).
pub const PRIORITY_DEFAULT: u8 = 5;
/// Chunked ingestion is biased higher so large imports drain quickly.
pub const PRIORITY_CHUNKED_INGEST: u8 = 3;

/// A message on the import queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobMessage {
    /// Kick off planning for a job. Carries no other data.
    #[serde(rename_all = "camelCase")]
    Parent { job_id: Uuid },

    /// One unit of partitioned work produced by the planner.
    #[serde(rename_all = "camelCase")]
    Chunk {
        job_id: Uuid,
        /// 0-based, unique per job.
        chunk_index: u32,
        chunk_count: u32,
        /// Registry key of the strategy that owns this chunk.
        strategy: String,
        /// Strategy-defined chunk input (sub-file path, key range, ...).
        payload: serde_json::Value,
    },
}

impl JobMessage {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobMessage::Parent { job_id } => *job_id,
            JobMessage::Chunk { job_id, .. } => *job_id,
        }
    }

    /// The chunk index, when this is a chunk message.
    pub fn chunk_index(&self) -> Option<u32> {
        match self {
            JobMessage::Parent { .. } => None,
            JobMessage::Chunk { chunk_index, .. } => Some(*chunk_index),
        }
    }

    pub fn encode(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Encode(e.to_string()))
    }

    pub fn decode(body: &str) -> Result<Self, QueueError> {
        serde_json::from_str(body).map_err(|e| QueueError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_wire_format() {
        let id = Uuid::new_v4();
        let body = JobMessage::Parent { job_id: id }.encode().unwrap();
        assert!(body.contains(r#""kind":"parent""#));
        assert!(body.contains(r#""jobId""#));

        let back = JobMessage::decode(&body).unwrap();
        assert_eq!(back.job_id(), id);
        assert_eq!(back.chunk_index(), None);
    }

    #[test]
    fn test_chunk_roundtrip() {
        let msg = JobMessage::Chunk {
            job_id: Uuid::new_v4(),
            chunk_index: 3,
            chunk_count: 8,
            strategy: "raw-line-items".to_string(),
            payload: serde_json::json!({"csvPath": "/tmp/chunk-3.csv", "startRow": 750}),
        };
        let back = JobMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.chunk_index(), Some(3));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let err = JobMessage::decode(r#"{"kind":"cleanup","jobId":"x"}"#).unwrap_err();
        assert!(matches!(err, QueueError::Parse(_)));
        assert!(!err.is_transient());
    }
}
