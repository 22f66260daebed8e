//! Storage-agnostic contract for import job persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::JobError;
use crate::job::{ChunkTally, ImportJob, ImportJobStatus, JobScope, NewImportJob};

/// Per-status counts for the pending summary endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCounts {
    pub queued: u32,
    pub running: u32,
}

/// Durable store for [`ImportJob`] records.
///
/// All mutating operations enforce the status state machine: writes
/// against a terminal job return [`JobError::InvalidState`] (or no-op
/// where the contract says so), and progress never moves backwards.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new QUEUED job with zeroed counters.
    async fn create(&self, new_job: NewImportJob) -> Result<ImportJob, JobError>;

    async fn get(&self, id: Uuid) -> Result<ImportJob, JobError>;

    /// Move QUEUED → RUNNING and stamp `started_at`. Idempotent: a job
    /// already RUNNING or terminal is returned unchanged.
    async fn transition_to_running(&self, id: Uuid) -> Result<ImportJob, JobError>;

    /// First-writer-wins claim on planning, taken before the planner
    /// runs its destructive precondition. Returns `false` when another
    /// delivery already holds the claim, a plan is set, or the job is
    /// not RUNNING; the caller must then back off without planning.
    async fn claim_planning(&self, id: Uuid) -> Result<bool, JobError>;

    /// Give back a planning claim after a failed attempt so the nacked
    /// parent message can retry. No-op once a plan has landed.
    async fn release_planning(&self, id: Uuid) -> Result<(), JobError>;

    /// Record the planner's output: total chunk count plus strategy
    /// metadata. Fails if a plan is already set or the job is not
    /// RUNNING.
    async fn set_plan(
        &self,
        id: Uuid,
        total_chunks: u32,
        meta: serde_json::Value,
    ) -> Result<(), JobError>;

    /// Update progress/message on a RUNNING job. Progress is clamped
    /// to never decrease; calls against terminal jobs are no-ops.
    async fn set_progress(
        &self,
        id: Uuid,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), JobError>;

    /// Atomically record that `chunk_index` finished. Each distinct
    /// index increments `completed_chunks` exactly once regardless of
    /// redelivery; the returned tally tells the caller whether it owns
    /// finalization.
    async fn record_chunk_completed(
        &self,
        id: Uuid,
        chunk_index: u32,
    ) -> Result<ChunkTally, JobError>;

    /// RUNNING → SUCCEEDED with a result payload, progress 100.
    async fn mark_succeeded(&self, id: Uuid, result: serde_json::Value)
        -> Result<(), JobError>;

    /// Any non-terminal status → FAILED with an error payload. No-op
    /// when the job is already terminal.
    async fn mark_failed(&self, id: Uuid, error: serde_json::Value) -> Result<(), JobError>;

    /// Most recent jobs within a scope, newest first.
    async fn list_recent(&self, scope: &JobScope, limit: i64)
        -> Result<Vec<ImportJob>, JobError>;

    /// Counts of non-terminal jobs for a company.
    async fn pending_counts(&self, company_id: Uuid) -> Result<PendingCounts, JobError>;
}

/// Shared guard used by both store backends.
pub(crate) fn ensure_transition(
    current: ImportJobStatus,
    next: ImportJobStatus,
) -> Result<(), JobError> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(JobError::InvalidState(format!(
            "{} -> {}",
            current.as_str(),
            next.as_str()
        )))
    }
}
