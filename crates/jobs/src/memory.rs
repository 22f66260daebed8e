//! In-memory job store for local development and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::JobError;
use crate::job::{ChunkTally, ImportJob, ImportJobStatus, JobScope, NewImportJob};
use crate::store::{ensure_transition, JobStore, PendingCounts};

struct JobEntry {
    job: ImportJob,
    /// Chunk indexes already counted; the dedup that makes
    /// `record_chunk_completed` idempotent under redelivery.
    completed_indexes: HashSet<u32>,
    /// Set by `claim_planning`; keeps a duplicate parent delivery out
    /// of the planner while the winner is still inside it.
    planning_claimed: bool,
}

/// `JobStore` backed by a process-local map. Same semantics as the
/// Postgres backend, minus durability.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<HashMap<Uuid, JobEntry>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut JobEntry) -> Result<T, JobError>,
    ) -> Result<T, JobError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let entry = inner.get_mut(&id).ok_or(JobError::NotFound(id))?;
        f(entry)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new_job: NewImportJob) -> Result<ImportJob, JobError> {
        new_job.validate()?;
        let job = ImportJob {
            id: Uuid::new_v4(),
            scope: new_job.scope,
            import_type: new_job.import_type,
            status: ImportJobStatus::Queued,
            progress: 0,
            message: None,
            source_ref: new_job.source_ref,
            total_chunks: 0,
            completed_chunks: 0,
            meta: serde_json::Value::Null,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(
            job.id,
            JobEntry {
                job: job.clone(),
                completed_indexes: HashSet::new(),
                planning_claimed: false,
            },
        );
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<ImportJob, JobError> {
        self.with_entry(id, |entry| Ok(entry.job.clone()))
    }

    async fn transition_to_running(&self, id: Uuid) -> Result<ImportJob, JobError> {
        self.with_entry(id, |entry| {
            // RUNNING and terminal jobs read back unchanged.
            if entry.job.status == ImportJobStatus::Queued {
                entry.job.status = ImportJobStatus::Running;
                entry.job.started_at = Some(Utc::now());
            }
            Ok(entry.job.clone())
        })
    }

    async fn claim_planning(&self, id: Uuid) -> Result<bool, JobError> {
        self.with_entry(id, |entry| {
            let claimable = entry.job.status == ImportJobStatus::Running
                && entry.job.total_chunks == 0
                && !entry.planning_claimed;
            if claimable {
                entry.planning_claimed = true;
            }
            Ok(claimable)
        })
    }

    async fn release_planning(&self, id: Uuid) -> Result<(), JobError> {
        self.with_entry(id, |entry| {
            if entry.job.total_chunks == 0 {
                entry.planning_claimed = false;
            }
            Ok(())
        })
    }

    async fn set_plan(
        &self,
        id: Uuid,
        total_chunks: u32,
        meta: serde_json::Value,
    ) -> Result<(), JobError> {
        self.with_entry(id, |entry| {
            if entry.job.status != ImportJobStatus::Running {
                return Err(JobError::InvalidState(format!(
                    "cannot set plan while {}",
                    entry.job.status.as_str()
                )));
            }
            if entry.job.total_chunks != 0 {
                return Err(JobError::InvalidState("plan already set".into()));
            }
            if total_chunks == 0 {
                return Err(JobError::Validation("totalChunks must be positive".into()));
            }
            entry.job.total_chunks = total_chunks;
            entry.job.meta = meta;
            Ok(())
        })
    }

    async fn set_progress(
        &self,
        id: Uuid,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), JobError> {
        self.with_entry(id, |entry| {
            if entry.job.status.is_terminal() {
                return Ok(());
            }
            entry.job.progress = entry.job.progress.max(progress.min(100));
            if message.is_some() {
                entry.job.message = message;
            }
            Ok(())
        })
    }

    async fn record_chunk_completed(
        &self,
        id: Uuid,
        chunk_index: u32,
    ) -> Result<ChunkTally, JobError> {
        self.with_entry(id, |entry| {
            let job = &mut entry.job;
            let countable = job.status == ImportJobStatus::Running
                && job.completed_chunks < job.total_chunks
                && entry.completed_indexes.insert(chunk_index);
            if countable {
                job.completed_chunks += 1;
            }
            Ok(ChunkTally {
                newly_recorded: countable,
                completed: job.completed_chunks,
                total: job.total_chunks,
            })
        })
    }

    async fn mark_succeeded(
        &self,
        id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), JobError> {
        self.with_entry(id, |entry| {
            if entry.job.status.is_terminal() {
                return Ok(());
            }
            ensure_transition(entry.job.status, ImportJobStatus::Succeeded)?;
            entry.job.status = ImportJobStatus::Succeeded;
            entry.job.progress = 100;
            entry.job.result = Some(result);
            entry.job.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn mark_failed(&self, id: Uuid, error: serde_json::Value) -> Result<(), JobError> {
        self.with_entry(id, |entry| {
            if entry.job.status.is_terminal() {
                return Ok(());
            }
            entry.job.status = ImportJobStatus::Failed;
            entry.job.error = Some(error);
            entry.job.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn list_recent(
        &self,
        scope: &JobScope,
        limit: i64,
    ) -> Result<Vec<ImportJob>, JobError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut jobs: Vec<ImportJob> = inner
            .values()
            .filter(|entry| {
                entry.job.scope.company_id == scope.company_id
                    && scope
                        .project_id
                        .map_or(true, |p| entry.job.scope.project_id == Some(p))
            })
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn pending_counts(&self, company_id: Uuid) -> Result<PendingCounts, JobError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts = PendingCounts::default();
        for entry in inner.values() {
            if entry.job.scope.company_id != company_id {
                continue;
            }
            match entry.job.status {
                ImportJobStatus::Queued => counts.queued += 1,
                ImportJobStatus::Running => counts.running += 1,
                _ => {}
            }
        }
        Ok(counts)
    }
}
