//! Parent and chunk message handlers.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use siphon_jobs::{ImportJob, JobStore};
use siphon_queue::{EnqueueOptions, JobMessage, JobQueue, PRIORITY_CHUNKED_INGEST};

use crate::error::ImportError;
use crate::registry::ImportRegistry;
use crate::sink::DestinationStore;
use crate::source::SourceStore;
use crate::strategy::{
    ChunkContext, FinalizeContext, ImportStrategy, PlanContext, PlanTuning,
};

/// Progress floor once chunks are dispatched; chunk completions move
/// it from here toward (but never past) 99 until finalize sets 100.
const PROGRESS_DISPATCHED: u8 = 10;
const PROGRESS_CEILING_RUNNING: u8 = 99;

/// Everything a worker needs to process queue messages. Cheap to
/// clone; workers share one instance per process.
#[derive(Clone)]
pub struct ImportRuntime {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub registry: Arc<ImportRegistry>,
    pub source: Arc<dyn SourceStore>,
    pub sink: Arc<dyn DestinationStore>,
    pub tuning: PlanTuning,
}

impl ImportRuntime {
    /// Handle a parent message: plan the import and fan out chunks.
    ///
    /// No-ops when the job is terminal, already planned, or another
    /// delivery holds the planning claim, which makes duplicate parent
    /// delivery safe.
    pub async fn handle_parent(&self, job_id: Uuid) -> Result<(), ImportError> {
        let job = self.store.get(job_id).await?;
        if job.status.is_terminal() {
            info!(job_id = %job_id, status = job.status.as_str(), "parent for terminal job, skipping");
            return Ok(());
        }
        if job.total_chunks > 0 {
            warn!(job_id = %job_id, "parent redelivered after planning, skipping");
            return Ok(());
        }

        let strategy = self.registry.resolve(job.import_type.strategy_key())?;
        let job = self.store.transition_to_running(job_id).await?;

        // The claim must land before the strategy's destructive dataset
        // reset: a duplicate delivery that slipped past the guards above
        // has to back off here, not after the winner's chunks have
        // already committed rows it would wipe.
        if !self.store.claim_planning(job_id).await? {
            warn!(job_id = %job_id, "planning already claimed by another delivery, skipping");
            return Ok(());
        }

        match self.plan_and_fan_out(&job, strategy).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Give the claim back so the nacked parent can retry;
                // a no-op once set_plan has landed.
                if let Err(release) = self.store.release_planning(job_id).await {
                    warn!(job_id = %job_id, error = %release, "failed to release planning claim");
                }
                Err(e)
            }
        }
    }

    async fn plan_and_fan_out(
        &self,
        job: &ImportJob,
        strategy: Arc<dyn ImportStrategy>,
    ) -> Result<(), ImportError> {
        let job_id = job.id;
        self.store
            .set_progress(job_id, 5, Some("Planning import...".into()))
            .await?;

        let plan = strategy
            .plan(&PlanContext {
                job: job.clone(),
                source: self.source.clone(),
                sink: self.sink.clone(),
                tuning: self.tuning,
            })
            .await?;

        if plan.chunks.is_empty() {
            // Nothing to ingest; finalize inline.
            info!(job_id = %job_id, "empty source, finalizing inline");
            let result = strategy
                .finalize(&FinalizeContext { job: job.clone(), sink: self.sink.clone() })
                .await?;
            self.store.mark_succeeded(job_id, result).await?;
            return Ok(());
        }

        let chunk_count = plan.chunks.len() as u32;
        // Plan lands before the first chunk message so workers always
        // see total_chunks set.
        self.store.set_plan(job_id, chunk_count, plan.meta).await?;

        for (chunk_index, payload) in plan.chunks.into_iter().enumerate() {
            let message = JobMessage::Chunk {
                job_id,
                chunk_index: chunk_index as u32,
                chunk_count,
                strategy: strategy.name().to_string(),
                payload,
            };
            self.queue
                .enqueue(
                    &message,
                    EnqueueOptions::with_priority(PRIORITY_CHUNKED_INGEST),
                )
                .await?;
        }

        info!(job_id = %job_id, chunks = chunk_count, "dispatched import chunks");
        self.store
            .set_progress(
                job_id,
                PROGRESS_DISPATCHED,
                Some(format!("Dispatched {chunk_count} chunks")),
            )
            .await?;
        Ok(())
    }

    /// Handle a chunk message: ingest the chunk, bump the counter, and
    /// finalize if this delivery drove the counter to the total.
    pub async fn handle_chunk(
        &self,
        job_id: Uuid,
        chunk_index: u32,
        chunk_count: u32,
        strategy_name: &str,
        payload: serde_json::Value,
    ) -> Result<(), ImportError> {
        let job = self.store.get(job_id).await?;
        if job.status.is_terminal() {
            info!(job_id = %job_id, chunk_index, "chunk for terminal job, skipping");
            return Ok(());
        }

        let strategy = self.registry.resolve(strategy_name)?;
        let outcome = strategy
            .import_chunk(&ChunkContext {
                job: job.clone(),
                chunk_index,
                chunk_count,
                payload,
                sink: self.sink.clone(),
            })
            .await?;

        let tally = self.store.record_chunk_completed(job_id, chunk_index).await?;
        if !tally.newly_recorded {
            // A redelivery arriving after all chunks completed retries
            // finalization if an earlier attempt died between the last
            // count and mark_succeeded. Finalizers only read, so a
            // second run is safe; mark_succeeded resolves the race.
            if tally.total > 0 && tally.completed == tally.total {
                let job = self.store.get(job_id).await?;
                if !job.status.is_terminal() {
                    warn!(job_id = %job_id, chunk_index, "retrying unfinished finalization");
                    self.finalize(job_id, strategy).await?;
                    return Ok(());
                }
            }
            info!(job_id = %job_id, chunk_index, "chunk already counted, skipping");
            return Ok(());
        }

        info!(
            job_id = %job_id,
            chunk_index,
            rows = outcome.rows_written,
            completed = tally.completed,
            total = tally.total,
            "chunk imported"
        );
        self.store
            .set_progress(
                job_id,
                chunk_progress(tally.completed, tally.total),
                Some(format!("Imported chunk {}/{}", tally.completed, tally.total)),
            )
            .await?;

        if tally.is_last() {
            self.finalize(job_id, strategy).await?;
        }
        Ok(())
    }

    async fn finalize(
        &self,
        job_id: Uuid,
        strategy: Arc<dyn ImportStrategy>,
    ) -> Result<(), ImportError> {
        let job = self.store.get(job_id).await?;
        let result = strategy
            .finalize(&FinalizeContext { job, sink: self.sink.clone() })
            .await?;
        self.store.mark_succeeded(job_id, result).await?;
        info!(job_id = %job_id, "import job finalized");
        Ok(())
    }

    /// Enqueue the parent message for a freshly created job.
    pub async fn start(&self, job: &ImportJob) -> Result<(), ImportError> {
        self.queue
            .enqueue(&JobMessage::Parent { job_id: job.id }, EnqueueOptions::default())
            .await?;
        Ok(())
    }
}

/// Completion-driven progress: 10 at dispatch, approaching 99 as
/// chunks land. 100 is reserved for finalize.
fn chunk_progress(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return PROGRESS_DISPATCHED;
    }
    let span = (PROGRESS_CEILING_RUNNING - PROGRESS_DISPATCHED) as u64;
    let scaled = PROGRESS_DISPATCHED as u64 + span * completed as u64 / total as u64;
    scaled.min(PROGRESS_CEILING_RUNNING as u64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_progress_scales_between_floor_and_ceiling() {
        assert_eq!(chunk_progress(0, 4), 10);
        assert_eq!(chunk_progress(2, 4), 54);
        // Even the last chunk's progress write stays below 100; only
        // finalize reports completion.
        assert_eq!(chunk_progress(4, 4), 99);
        assert_eq!(chunk_progress(0, 0), 10);
    }
}
