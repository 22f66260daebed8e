//! Durable import-job records: the single source of truth for one
//! import run, its status state machine, and the store backends that
//! persist it.

pub mod error;
pub mod job;
pub mod memory;
pub mod pg;
pub mod store;

pub use error::JobError;
pub use job::{ChunkTally, ImportJob, ImportJobStatus, ImportType, JobScope, NewImportJob};
pub use memory::MemoryJobStore;
pub use pg::PgJobStore;
pub use store::{JobStore, PendingCounts};
