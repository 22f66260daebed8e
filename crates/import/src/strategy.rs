//! The strategy seam: one implementation per import type.

use std::sync::Arc;

use async_trait::async_trait;

use siphon_core::config::WorkerConfig;
use siphon_jobs::ImportJob;

use crate::error::ImportError;
use crate::sink::DestinationStore;
use crate::source::SourceStore;

/// Knobs the planner hands to strategies when sizing chunks.
#[derive(Debug, Clone, Copy)]
pub struct PlanTuning {
    /// Overrides the record-count heuristic when set.
    pub records_per_chunk: Option<u32>,
    pub max_chunks: u32,
}

impl PlanTuning {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            records_per_chunk: config.records_per_chunk,
            max_chunks: config.max_chunks,
        }
    }
}

impl Default for PlanTuning {
    fn default() -> Self {
        Self { records_per_chunk: None, max_chunks: 16 }
    }
}

/// Planner output: strategy metadata for the job record plus one
/// opaque payload per chunk. An empty chunk list means there is
/// nothing to ingest and the job finalizes inline.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub meta: serde_json::Value,
    pub chunks: Vec<serde_json::Value>,
}

impl ImportPlan {
    pub fn empty(meta: serde_json::Value) -> Self {
        Self { meta, chunks: Vec::new() }
    }
}

pub struct PlanContext {
    pub job: ImportJob,
    pub source: Arc<dyn SourceStore>,
    pub sink: Arc<dyn DestinationStore>,
    pub tuning: PlanTuning,
}

pub struct ChunkContext {
    pub job: ImportJob,
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub payload: serde_json::Value,
    pub sink: Arc<dyn DestinationStore>,
}

/// What one chunk wrote; folded into progress messages and logs.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub rows_written: u64,
}

pub struct FinalizeContext {
    pub job: ImportJob,
    pub sink: Arc<dyn DestinationStore>,
}

/// One import type's behavior across all three phases.
///
/// `plan` runs once per job, `import_chunk` once per chunk (possibly
/// redelivered, so it must tolerate re-running), and `finalize`
/// exactly once after the last chunk completes.
#[async_trait]
pub trait ImportStrategy: Send + Sync + std::fmt::Debug {
    /// Registry key; must match [`siphon_jobs::ImportType::strategy_key`].
    fn name(&self) -> &'static str;

    /// Partition the source into chunk payloads. Also the place to
    /// wipe prior derived rows for the job's scope, so it happens
    /// before any chunk writes.
    async fn plan(&self, ctx: &PlanContext) -> Result<ImportPlan, ImportError>;

    /// Ingest one chunk. Must be idempotent per chunk payload.
    async fn import_chunk(&self, ctx: &ChunkContext) -> Result<ChunkOutcome, ImportError>;

    /// Compute the job's result payload from the destination store.
    async fn finalize(&self, ctx: &FinalizeContext) -> Result<serde_json::Value, ImportError>;
}
