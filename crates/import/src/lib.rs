//! Chunked import pipeline: planning, parallel chunk ingestion, and
//! finalization for delimited-text exports.
//!
//! A parent message partitions the source into chunks and fans them
//! out; chunk messages run in parallel against the destination store;
//! the worker that records the final chunk completion finalizes the
//! job. All coordination state lives in the job record, so any worker
//! process can pick up any message.

pub mod dispatch;
pub mod error;
pub mod partition;
pub mod registry;
pub mod runtime;
pub mod sink;
pub mod source;
pub mod strategies;
pub mod strategy;

pub use dispatch::run_dispatcher;
pub use error::ImportError;
pub use registry::ImportRegistry;
pub use runtime::ImportRuntime;
pub use sink::{DerivedRow, DestinationStore, MemoryDestination, PgDestination};
pub use source::{LocalSourceStore, ObjectSourceStore, SourceStore};
pub use strategy::{
    ChunkContext, ChunkOutcome, FinalizeContext, ImportPlan, ImportStrategy, PlanContext,
    PlanTuning,
};
