//! Postgres-backed job store.
//!
//! Chunk completion counting rides on two guarantees: a unique index
//! on `import_chunk_completions (job_id, chunk_index)` deduplicates
//! redelivered chunks, and the counter update is conditioned on the
//! job still being RUNNING with room left in the counter. Both run in
//! one transaction so a crash between them cannot double-count.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::JobError;
use crate::job::{
    ChunkTally, ImportJob, ImportJobStatus, ImportType, JobScope, NewImportJob,
};
use crate::store::{ensure_transition, JobStore, PendingCounts};

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw row shape; parsed into the domain type by `into_job`.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    company_id: Uuid,
    project_id: Option<Uuid>,
    import_type: String,
    status: String,
    progress: i16,
    message: Option<String>,
    source_ref: String,
    total_chunks: i32,
    completed_chunks: i32,
    meta: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobRow {
    fn into_job(self) -> Result<ImportJob, JobError> {
        Ok(ImportJob {
            id: self.id,
            scope: JobScope {
                company_id: self.company_id,
                project_id: self.project_id,
            },
            import_type: ImportType::parse(&self.import_type)?,
            status: ImportJobStatus::parse(&self.status)?,
            progress: self.progress.clamp(0, 100) as u8,
            message: self.message,
            source_ref: self.source_ref,
            total_chunks: self.total_chunks.max(0) as u32,
            completed_chunks: self.completed_chunks.max(0) as u32,
            meta: self.meta,
            result: self.result,
            error: self.error,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

const JOB_COLUMNS: &str = "id, company_id, project_id, import_type, status, progress, \
     message, source_ref, total_chunks, completed_chunks, meta, result, error, \
     created_at, started_at, finished_at";

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, new_job: NewImportJob) -> Result<ImportJob, JobError> {
        new_job.validate()?;
        let query = format!(
            "INSERT INTO import_jobs \
             (id, company_id, project_id, import_type, status, progress, source_ref, \
              total_chunks, completed_chunks, meta, created_at) \
             VALUES ($1, $2, $3, $4, 'QUEUED', 0, $5, 0, 0, 'null'::jsonb, now()) \
             RETURNING {JOB_COLUMNS}"
        );
        let row: JobRow = sqlx::query_as(&query)
            .bind(Uuid::new_v4())
            .bind(new_job.scope.company_id)
            .bind(new_job.scope.project_id)
            .bind(new_job.import_type.as_str())
            .bind(&new_job.source_ref)
            .fetch_one(&self.pool)
            .await?;
        let job = row.into_job()?;
        tracing::info!(
            job_id = %job.id,
            import_type = job.import_type.as_str(),
            "created import job"
        );
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<ImportJob, JobError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(JobError::NotFound(id))?.into_job()
    }

    async fn transition_to_running(&self, id: Uuid) -> Result<ImportJob, JobError> {
        let query = format!(
            "UPDATE import_jobs \
             SET status = 'RUNNING', started_at = coalesce(started_at, now()) \
             WHERE id = $1 AND status IN ('QUEUED', 'RUNNING') \
             RETURNING {JOB_COLUMNS}"
        );
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row.into_job(),
            // Missing or terminal; terminal jobs read back unchanged.
            None => self.get(id).await,
        }
    }

    async fn claim_planning(&self, id: Uuid) -> Result<bool, JobError> {
        let updated = sqlx::query(
            "UPDATE import_jobs SET planning_started = TRUE \
             WHERE id = $1 AND status = 'RUNNING' AND total_chunks = 0 \
               AND NOT planning_started",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            // Distinguish a lost claim from an unknown job.
            self.get(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn release_planning(&self, id: Uuid) -> Result<(), JobError> {
        sqlx::query(
            "UPDATE import_jobs SET planning_started = FALSE \
             WHERE id = $1 AND total_chunks = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_plan(
        &self,
        id: Uuid,
        total_chunks: u32,
        meta: serde_json::Value,
    ) -> Result<(), JobError> {
        if total_chunks == 0 {
            return Err(JobError::Validation("totalChunks must be positive".into()));
        }
        let result = sqlx::query(
            "UPDATE import_jobs SET total_chunks = $2, meta = $3 \
             WHERE id = $1 AND status = 'RUNNING' AND total_chunks = 0",
        )
        .bind(id)
        .bind(total_chunks as i32)
        .bind(&meta)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let job = self.get(id).await?;
            return Err(JobError::InvalidState(format!(
                "cannot set plan: status={} totalChunks={}",
                job.status.as_str(),
                job.total_chunks
            )));
        }
        Ok(())
    }

    async fn set_progress(
        &self,
        id: Uuid,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), JobError> {
        // GREATEST keeps progress monotonic under out-of-order chunk
        // updates; terminal rows are left untouched.
        sqlx::query(
            "UPDATE import_jobs \
             SET progress = GREATEST(progress, $2), message = coalesce($3, message) \
             WHERE id = $1 AND status NOT IN ('SUCCEEDED', 'FAILED')",
        )
        .bind(id)
        .bind(progress.min(100) as i16)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_chunk_completed(
        &self,
        id: Uuid,
        chunk_index: u32,
    ) -> Result<ChunkTally, JobError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO import_chunk_completions (job_id, chunk_index, completed_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (job_id, chunk_index) DO NOTHING",
        )
        .bind(id)
        .bind(chunk_index as i32)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            let updated: Option<(i32, i32)> = sqlx::query_as(
                "UPDATE import_jobs \
                 SET completed_chunks = completed_chunks + 1 \
                 WHERE id = $1 AND status = 'RUNNING' \
                   AND completed_chunks < total_chunks \
                 RETURNING completed_chunks, total_chunks",
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((completed, total)) = updated {
                tx.commit().await?;
                return Ok(ChunkTally {
                    newly_recorded: true,
                    completed: completed.max(0) as u32,
                    total: total.max(0) as u32,
                });
            }
            // Job is terminal or full; drop the completion record too.
            tx.rollback().await?;
        } else {
            tx.rollback().await?;
        }

        let job = self.get(id).await?;
        Ok(ChunkTally {
            newly_recorded: false,
            completed: job.completed_chunks,
            total: job.total_chunks,
        })
    }

    async fn mark_succeeded(
        &self,
        id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), JobError> {
        let updated = sqlx::query(
            "UPDATE import_jobs \
             SET status = 'SUCCEEDED', progress = 100, result = $2, finished_at = now() \
             WHERE id = $1 AND status = 'RUNNING'",
        )
        .bind(id)
        .bind(&result)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            let job = self.get(id).await?;
            // Already terminal is a no-op; anything else is a caller bug.
            if !job.status.is_terminal() {
                ensure_transition(job.status, ImportJobStatus::Succeeded)?;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: serde_json::Value) -> Result<(), JobError> {
        let updated = sqlx::query(
            "UPDATE import_jobs \
             SET status = 'FAILED', error = $2, finished_at = now() \
             WHERE id = $1 AND status IN ('QUEUED', 'RUNNING')",
        )
        .bind(id)
        .bind(&error)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            // Already terminal is fine; missing is not.
            self.get(id).await?;
        } else {
            tracing::warn!(job_id = %id, "import job marked failed");
        }
        Ok(())
    }

    async fn list_recent(
        &self,
        scope: &JobScope,
        limit: i64,
    ) -> Result<Vec<ImportJob>, JobError> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM import_jobs \
             WHERE company_id = $1 AND ($2::uuid IS NULL OR project_id = $2) \
             ORDER BY created_at DESC LIMIT $3"
        );
        let rows: Vec<JobRow> = sqlx::query_as(&query)
            .bind(scope.company_id)
            .bind(scope.project_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn pending_counts(&self, company_id: Uuid) -> Result<PendingCounts, JobError> {
        let (queued, running): (i64, i64) = sqlx::query_as(
            "SELECT \
               count(*) FILTER (WHERE status = 'QUEUED'), \
               count(*) FILTER (WHERE status = 'RUNNING') \
             FROM import_jobs WHERE company_id = $1",
        )
        .bind(company_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(PendingCounts {
            queued: queued.max(0) as u32,
            running: running.max(0) as u32,
        })
    }
}
