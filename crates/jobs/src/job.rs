//! The `ImportJob` record and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// Lifecycle status of an import job.
///
/// Transitions are forward-only: `QUEUED → RUNNING → {SUCCEEDED,
/// FAILED}`. Both terminal states accept no further writes to status,
/// progress, or chunk counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportJobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl ImportJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ImportJobStatus::Succeeded | ImportJobStatus::Failed)
    }

    /// Whether `self → next` is a legal forward transition. Failure
    /// is reachable from any non-terminal state; success only from
    /// RUNNING.
    pub fn can_transition_to(self, next: ImportJobStatus) -> bool {
        use ImportJobStatus::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Failed) | (Running, Succeeded) | (Running, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportJobStatus::Queued => "QUEUED",
            ImportJobStatus::Running => "RUNNING",
            ImportJobStatus::Succeeded => "SUCCEEDED",
            ImportJobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, JobError> {
        match s {
            "QUEUED" => Ok(ImportJobStatus::Queued),
            "RUNNING" => Ok(ImportJobStatus::Running),
            "SUCCEEDED" => Ok(ImportJobStatus::Succeeded),
            "FAILED" => Ok(ImportJobStatus::Failed),
            other => Err(JobError::Serialize(format!("unknown job status: {other}"))),
        }
    }
}

/// Which chunk-importer strategy applies to a job. Immutable after
/// creation; the string form doubles as the registry key carried by
/// chunk messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportType {
    RawLineItems,
    ComponentBreakdown,
    PriceList,
}

impl ImportType {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportType::RawLineItems => "raw-line-items",
            ImportType::ComponentBreakdown => "component-breakdown",
            ImportType::PriceList => "price-list",
        }
    }

    /// Registry key of the strategy that handles this import type.
    pub fn strategy_key(self) -> &'static str {
        self.as_str()
    }

    pub fn parse(s: &str) -> Result<Self, JobError> {
        match s {
            "raw-line-items" => Ok(ImportType::RawLineItems),
            "component-breakdown" => Ok(ImportType::ComponentBreakdown),
            "price-list" => Ok(ImportType::PriceList),
            other => Err(JobError::Serialize(format!("unknown import type: {other}"))),
        }
    }
}

/// Tenant isolation scope: company plus an optional project sub-scope.
/// Immutable for the life of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobScope {
    pub company_id: Uuid,
    pub project_id: Option<Uuid>,
}

impl JobScope {
    pub fn company(company_id: Uuid) -> Self {
        Self { company_id, project_id: None }
    }

    pub fn project(company_id: Uuid, project_id: Uuid) -> Self {
        Self { company_id, project_id: Some(project_id) }
    }

    /// Stable key for namespacing derived-row identities: the narrowest
    /// scope component present.
    pub fn key(&self) -> String {
        match self.project_id {
            Some(project_id) => project_id.to_string(),
            None => self.company_id.to_string(),
        }
    }
}

/// The durable record for one import run.
///
/// Identity fields (`id`, `scope`, `import_type`, `source_ref`) are
/// immutable for the job's entire life, which is what makes it safe to
/// pass only the id through queue messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: Uuid,
    #[serde(flatten)]
    pub scope: JobScope,
    pub import_type: ImportType,
    pub status: ImportJobStatus,
    /// Coarse 0-100, monotonically non-decreasing while RUNNING.
    pub progress: u8,
    /// Human-readable phase description for the status endpoint.
    pub message: Option<String>,
    /// Path/URI of the uploaded source file. Read-only planner input.
    pub source_ref: String,
    /// Set once by the planner; 0 until then.
    pub total_chunks: u32,
    /// Incremented atomically by chunk workers.
    pub completed_chunks: u32,
    /// Strategy-specific planning metadata, opaque to the orchestrator.
    #[serde(rename = "metaJson")]
    pub meta: serde_json::Value,
    /// Exactly one of result/error is set once status is terminal.
    #[serde(rename = "resultJson")]
    pub result: Option<serde_json::Value>,
    #[serde(rename = "errorJson")]
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Input to [`crate::store::JobStore::create`].
#[derive(Debug, Clone)]
pub struct NewImportJob {
    pub scope: JobScope,
    pub import_type: ImportType,
    pub source_ref: String,
}

impl NewImportJob {
    /// Validate identity fields per the job store contract.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.scope.company_id.is_nil() {
            return Err(JobError::Validation("scope.companyId must not be empty".into()));
        }
        if self.source_ref.trim().is_empty() {
            return Err(JobError::Validation("sourceRef must not be empty".into()));
        }
        Ok(())
    }
}

/// Result of recording a chunk completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTally {
    /// False when this chunk index was already recorded or the job is
    /// terminal — the caller must treat the delivery as a no-op.
    pub newly_recorded: bool,
    pub completed: u32,
    pub total: u32,
}

impl ChunkTally {
    /// Whether the caller drove the counter to the total and therefore
    /// owns finalization. True for exactly one caller per job.
    pub fn is_last(&self) -> bool {
        self.newly_recorded && self.total > 0 && self.completed == self.total
    }
}
