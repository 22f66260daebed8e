//! Shared application state.

use std::path::PathBuf;
use std::sync::Arc;

use siphon_core::Config;
use siphon_import::ImportRuntime;
use siphon_jobs::JobStore;

pub struct AppState {
    pub runtime: ImportRuntime,
    /// Where multipart uploads are written before a job is created.
    pub upload_dir: PathBuf,
    pub config: Config,
}

impl AppState {
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.runtime.store
    }
}
