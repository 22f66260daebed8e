//! server — HTTP API for submitting and tracking chunked imports.
//!
//! Accepts multipart uploads, creates job records, and enqueues parent
//! messages; the import-worker binary does the actual processing. With
//! no postgres configured everything runs in-process on the in-memory
//! backends, including a local dispatcher, so the whole pipeline works
//! in a single process for development.

mod api;
mod db;
mod router;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use siphon_core::Config;
use siphon_import::{
    run_dispatcher, DestinationStore, ImportRegistry, ImportRuntime, LocalSourceStore,
    MemoryDestination, ObjectSourceStore, PgDestination, PlanTuning, SourceStore,
};
use siphon_jobs::{JobStore, MemoryJobStore, PgJobStore};
use siphon_queue::{JobQueue, MemoryQueue, SqsQueue};

fn load_config() -> Config {
    siphon_core::config::load_dotenv();
    Config::from_env()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config = load_config();
    config.log_summary();

    let embedded = !config.postgres.is_configured();
    let (store, sink): (Arc<dyn JobStore>, Arc<dyn DestinationStore>) = if embedded {
        info!("job store: in-memory (no postgres configured)");
        (Arc::new(MemoryJobStore::new()), Arc::new(MemoryDestination::new()))
    } else {
        let pool = db::init_pg_pool(&config.postgres).await?;
        (
            Arc::new(PgJobStore::new(pool.clone())),
            Arc::new(PgDestination::new(pool)),
        )
    };

    let queue: Arc<dyn JobQueue> = if config.queue.is_sqs() {
        Arc::new(SqsQueue::new(&config.aws, &config.queue).await?)
    } else {
        Arc::new(MemoryQueue::new())
    };

    let source: Arc<dyn SourceStore> = if config.aws.s3_bucket.is_some() {
        Arc::new(ObjectSourceStore::new(&config.aws, &config.storage)?)
    } else {
        Arc::new(LocalSourceStore::new(&config.storage)?)
    };

    tokio::fs::create_dir_all(&config.storage.upload_dir).await?;

    let runtime = ImportRuntime {
        store,
        queue,
        registry: Arc::new(ImportRegistry::with_builtins()),
        source,
        sink,
        tuning: PlanTuning::from_config(&config.worker),
    };

    // Embedded mode has no external worker; run dispatch loops here
    // so submitted imports actually progress.
    if embedded && !config.queue.is_sqs() {
        let poll_interval = Duration::from_millis(config.queue.poll_interval_ms);
        let max_batch_size = config.queue.max_batch_size;
        for worker_id in 0..config.worker.concurrency as usize {
            tokio::spawn(run_dispatcher(
                runtime.clone(),
                worker_id,
                poll_interval,
                max_batch_size,
            ));
        }
        info!(concurrency = config.worker.concurrency, "embedded import workers running");
    }

    let state = Arc::new(state::AppState {
        upload_dir: config.storage.upload_dir.clone(),
        runtime,
        config: config.clone(),
    });
    let app = router::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(addr = %addr, "server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
