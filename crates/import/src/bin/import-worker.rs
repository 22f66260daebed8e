//! import-worker — queue consumer running the chunked import pipeline.
//!
//! Polls the job queue for parent and chunk messages and drives them
//! through the strategy registry. Multiple processes (and multiple
//! loops per process) can run side by side; all coordination happens
//! through the job store.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use siphon_core::Config;
use siphon_import::{
    run_dispatcher, DestinationStore, ImportRegistry, ImportRuntime, LocalSourceStore,
    MemoryDestination, ObjectSourceStore, PgDestination, PlanTuning, SourceStore,
};
use siphon_jobs::{JobStore, MemoryJobStore, PgJobStore};
use siphon_queue::{JobQueue, MemoryQueue, SqsQueue};

// ── CLI ─────────────────────────────────────────────────────────────

/// Siphon import worker — plans and ingests chunked imports.
#[derive(Parser, Debug)]
#[command(name = "import-worker", version, about)]
struct Cli {
    /// Number of concurrent dispatch loops.
    #[arg(long, env = "IMPORT_WORKER_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    siphon_core::config::load_dotenv();
    let config = Config::from_env();
    config.log_summary();
    let cli = Cli::parse();

    let (store, sink): (Arc<dyn JobStore>, Arc<dyn DestinationStore>) =
        if config.postgres.is_configured() {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&config.postgres.connection_string())
                .await?;
            info!("job store: postgres");
            (
                Arc::new(PgJobStore::new(pool.clone())),
                Arc::new(PgDestination::new(pool)),
            )
        } else {
            info!("job store: in-memory (no postgres configured)");
            (Arc::new(MemoryJobStore::new()), Arc::new(MemoryDestination::new()))
        };

    let queue: Arc<dyn JobQueue> = if config.queue.is_sqs() {
        info!("queue: sqs");
        Arc::new(SqsQueue::new(&config.aws, &config.queue).await?)
    } else {
        info!("queue: in-memory");
        Arc::new(MemoryQueue::new())
    };

    let source: Arc<dyn SourceStore> = if config.aws.s3_bucket.is_some() {
        Arc::new(ObjectSourceStore::new(&config.aws, &config.storage)?)
    } else {
        Arc::new(LocalSourceStore::new(&config.storage)?)
    };

    let runtime = ImportRuntime {
        store,
        queue,
        registry: Arc::new(ImportRegistry::with_builtins()),
        source,
        sink,
        tuning: PlanTuning::from_config(&config.worker),
    };

    let poll_interval = Duration::from_millis(config.queue.poll_interval_ms);
    let max_batch_size = config.queue.max_batch_size;
    let concurrency = cli.concurrency.max(1);

    let mut workers = Vec::with_capacity(concurrency);
    for worker_id in 0..concurrency {
        workers.push(tokio::spawn(run_dispatcher(
            runtime.clone(),
            worker_id,
            poll_interval,
            max_batch_size,
        )));
    }
    info!(concurrency, "import worker running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for worker in &workers {
        worker.abort();
    }
    Ok(())
}
