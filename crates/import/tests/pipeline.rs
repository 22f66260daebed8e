//! End-to-end pipeline tests over the in-memory store, queue, and
//! destination: parent planning, parallel chunk ingestion, duplicate
//! deliveries, permanent failures, and finalize-exactly-once.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use siphon_import::{
    dispatch::handle_delivery, ChunkContext, ChunkOutcome, DestinationStore, FinalizeContext,
    ImportError, ImportPlan, ImportRegistry, ImportRuntime, ImportStrategy, LocalSourceStore,
    MemoryDestination, PlanContext, PlanTuning, SourceStore,
};
use siphon_jobs::{
    ImportJob, ImportJobStatus, ImportType, JobScope, JobStore, MemoryJobStore, NewImportJob,
};
use siphon_queue::{JobQueue, MemoryQueue};

struct Harness {
    runtime: ImportRuntime,
    store: Arc<MemoryJobStore>,
    queue: Arc<MemoryQueue>,
    sink: Arc<MemoryDestination>,
    _dir: tempfile::TempDir,
    dir_path: PathBuf,
}

fn harness_with_registry(registry: ImportRegistry) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();
    let store = Arc::new(MemoryJobStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let sink = Arc::new(MemoryDestination::new());
    let source = Arc::new(LocalSourceStore::new(&siphon_core::config::StorageConfig {
        upload_dir: dir_path.clone(),
        chunk_dir: dir_path.join("chunks"),
    })
    .unwrap());

    let runtime = ImportRuntime {
        store: store.clone() as Arc<dyn JobStore>,
        queue: queue.clone() as Arc<dyn JobQueue>,
        registry: Arc::new(registry),
        source: source as Arc<dyn SourceStore>,
        sink: sink.clone() as Arc<dyn DestinationStore>,
        // Small chunks so modest fixtures exercise real fan-out.
        tuning: PlanTuning { records_per_chunk: Some(250), max_chunks: 16 },
    };
    Harness { runtime, store, queue, sink, _dir: dir, dir_path }
}

fn harness() -> Harness {
    harness_with_registry(ImportRegistry::with_builtins())
}

impl Harness {
    fn write_source(&self, name: &str, header: &str, rows: impl Iterator<Item = String>) -> String {
        let mut contents = format!("{header}\n");
        for row in rows {
            contents.push_str(&row);
            contents.push('\n');
        }
        let path = self.dir_path.join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn submit(&self, import_type: ImportType, source_ref: String) -> ImportJob {
        let job = self
            .store
            .create(NewImportJob {
                scope: JobScope::company(Uuid::new_v4()),
                import_type,
                source_ref,
            })
            .await
            .unwrap();
        self.runtime.start(&job).await.unwrap();
        job
    }

    /// Process deliveries until the queue drains.
    async fn drain(&self) {
        loop {
            let deliveries = self.runtime.queue.poll_batch(10).await.unwrap();
            if deliveries.is_empty() {
                assert!(self.queue.is_empty(), "messages stuck in flight");
                return;
            }
            for delivery in deliveries {
                handle_delivery(&self.runtime, delivery).await;
            }
        }
    }
}

fn line_items_source(harness: &Harness, rows: usize) -> String {
    harness.write_source(
        "line-items.csv",
        "Description,Amount",
        (0..rows).map(|i| format!("item {i},{}.0", i + 1)),
    )
}

#[tokio::test]
async fn test_import_succeeds_across_chunks() {
    let harness = harness();
    let source = line_items_source(&harness, 1000);
    let job = harness.submit(ImportType::RawLineItems, source).await;

    harness.drain().await;

    let job = harness.store.get(job.id).await.unwrap();
    assert_eq!(job.status, ImportJobStatus::Succeeded);
    assert_eq!(job.progress, 100);
    assert_eq!(job.total_chunks, 4);
    assert_eq!(job.completed_chunks, 4);

    let result = job.result.unwrap();
    assert_eq!(result["rowCount"], 1000);
    // Sum of 1..=1000.
    assert_eq!(result["totalAmount"], 500500.0);
    assert_eq!(harness.sink.rows("raw_line_items").len(), 1000);
}

#[tokio::test]
async fn test_empty_source_finalizes_inline() {
    let harness = harness();
    let source = line_items_source(&harness, 0);
    let job = harness.submit(ImportType::RawLineItems, source).await;

    harness.drain().await;

    let job = harness.store.get(job.id).await.unwrap();
    assert_eq!(job.status, ImportJobStatus::Succeeded);
    assert_eq!(job.progress, 100);
    assert_eq!(job.total_chunks, 0);
    assert_eq!(job.result.unwrap()["rowCount"], 0);
}

#[tokio::test]
async fn test_duplicate_parent_is_a_no_op() {
    let harness = harness();
    let source = line_items_source(&harness, 600);
    let job = harness.submit(ImportType::RawLineItems, source).await;
    // Redelivered parent (e.g. enqueue retried after a timeout).
    harness.runtime.start(&harness.store.get(job.id).await.unwrap()).await.unwrap();

    harness.drain().await;

    let job = harness.store.get(job.id).await.unwrap();
    assert_eq!(job.status, ImportJobStatus::Succeeded);
    assert_eq!(job.total_chunks, 3);
    // A second planning pass would have re-chunked and doubled rows.
    assert_eq!(harness.sink.rows("raw_line_items").len(), 600);
}

#[tokio::test]
async fn test_redelivered_chunk_counts_once() {
    let harness = harness();
    let source = line_items_source(&harness, 500);
    let job = harness.submit(ImportType::RawLineItems, source).await;

    loop {
        let deliveries = harness.runtime.queue.poll_batch(10).await.unwrap();
        if deliveries.is_empty() {
            break;
        }
        for delivery in deliveries {
            let duplicate = delivery.clone();
            handle_delivery(&harness.runtime, delivery).await;
            // Same body handled again, as after a visibility timeout.
            handle_delivery(&harness.runtime, duplicate).await;
        }
    }

    let job = harness.store.get(job.id).await.unwrap();
    assert_eq!(job.status, ImportJobStatus::Succeeded);
    assert_eq!(job.completed_chunks, job.total_chunks);
    assert_eq!(harness.sink.rows("raw_line_items").len(), 500);
}

#[tokio::test]
async fn test_missing_column_fails_the_job() {
    let harness = harness();
    let source = harness.write_source(
        "prices.csv",
        "Name,Cost",
        (0..10).map(|i| format!("part {i},{i}")),
    );
    let job = harness.submit(ImportType::PriceList, source).await;

    harness.drain().await;

    let job = harness.store.get(job.id).await.unwrap();
    assert_eq!(job.status, ImportJobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error["message"].as_str().unwrap().contains("Item Code"));
}

#[tokio::test]
async fn test_component_groups_stay_within_one_chunk() {
    let harness = harness();
    // 600 rows over 30 codes; grouping must survive the fan-out.
    let source = harness.write_source(
        "components.csv",
        "Code,Amount",
        (0..600).map(|i| format!("CMP-{:02},2.0", i % 30)),
    );
    let job = harness.submit(ImportType::ComponentBreakdown, source).await;

    harness.drain().await;

    let job = harness.store.get(job.id).await.unwrap();
    assert_eq!(job.status, ImportJobStatus::Succeeded);

    let result = job.result.unwrap();
    assert_eq!(result["componentCount"], 30);
    assert_eq!(result["totalAmount"], 1200.0);

    // Every aggregate must cover all 20 occurrences of its code; a
    // split group would show up as a partial count.
    for row in harness.sink.rows("component_breakdown") {
        assert_eq!(row.payload["occurrences"], 20);
        assert_eq!(row.payload["totalAmount"], 40.0);
    }
}

// ── failure injection ───────────────────────────────────────────────

/// Delegates to a real strategy but fails one chunk index permanently
/// and counts finalize calls.
#[derive(Debug)]
struct Faulty {
    inner: Box<dyn ImportStrategy>,
    fail_chunk: Option<u32>,
    finalize_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ImportStrategy for Faulty {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn plan(&self, ctx: &PlanContext) -> Result<ImportPlan, ImportError> {
        self.inner.plan(ctx).await
    }

    async fn import_chunk(&self, ctx: &ChunkContext) -> Result<ChunkOutcome, ImportError> {
        if self.fail_chunk == Some(ctx.chunk_index) {
            return Err(ImportError::Strategy("corrupt block".into()));
        }
        self.inner.import_chunk(ctx).await
    }

    async fn finalize(&self, ctx: &FinalizeContext) -> Result<serde_json::Value, ImportError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.finalize(ctx).await
    }
}

#[tokio::test]
async fn test_permanent_chunk_failure_fails_job_and_keeps_other_rows() {
    let finalize_calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ImportRegistry::new();
    registry.register(Arc::new(Faulty {
        inner: Box::new(siphon_import::strategies::RawLineItems),
        fail_chunk: Some(2),
        finalize_calls: finalize_calls.clone(),
    }));
    let harness = harness_with_registry(registry);

    let source = line_items_source(&harness, 1000);
    let job = harness.submit(ImportType::RawLineItems, source).await;

    harness.drain().await;

    let job = harness.store.get(job.id).await.unwrap();
    assert_eq!(job.status, ImportJobStatus::Failed);
    assert_eq!(job.total_chunks, 4);

    let error = job.error.unwrap();
    assert_eq!(error["chunkIndex"], 2);
    assert!(error["message"].as_str().unwrap().contains("corrupt block"));

    // The three healthy chunks' rows stay for inspection.
    assert_eq!(harness.sink.rows("raw_line_items").len(), 750);
    assert_eq!(finalize_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_workers_finalize_exactly_once() {
    let finalize_calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ImportRegistry::new();
    registry.register(Arc::new(Faulty {
        inner: Box::new(siphon_import::strategies::RawLineItems),
        fail_chunk: None,
        finalize_calls: finalize_calls.clone(),
    }));
    let harness = harness_with_registry(registry);

    let source = line_items_source(&harness, 2000);
    let job = harness.submit(ImportType::RawLineItems, source).await;

    // Four workers racing over the same queue.
    let mut workers = Vec::new();
    for _ in 0..4 {
        let runtime = harness.runtime.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let deliveries = runtime.queue.poll_batch(2).await.unwrap();
                if deliveries.is_empty() {
                    return;
                }
                for delivery in deliveries {
                    handle_delivery(&runtime, delivery).await;
                }
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }
    // Workers can race to empty polls while siblings still hold
    // messages in flight; one final drain settles any leftovers.
    harness.drain().await;

    let job = harness.store.get(job.id).await.unwrap();
    assert_eq!(job.status, ImportJobStatus::Succeeded);
    assert_eq!(job.total_chunks, 8);
    assert_eq!(job.completed_chunks, 8);
    assert_eq!(finalize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.sink.rows("raw_line_items").len(), 2000);
}

/// Delegates to a real strategy but parks inside `plan` until the test
/// releases the gate, counting how many deliveries got that far.
#[derive(Debug)]
struct GatedPlan {
    inner: Box<dyn ImportStrategy>,
    gate: Arc<tokio::sync::Semaphore>,
    plan_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ImportStrategy for GatedPlan {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn plan(&self, ctx: &PlanContext) -> Result<ImportPlan, ImportError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.unwrap();
        self.inner.plan(ctx).await
    }

    async fn import_chunk(&self, ctx: &ChunkContext) -> Result<ChunkOutcome, ImportError> {
        self.inner.import_chunk(ctx).await
    }

    async fn finalize(&self, ctx: &FinalizeContext) -> Result<serde_json::Value, ImportError> {
        self.inner.finalize(ctx).await
    }
}

#[tokio::test]
async fn test_duplicate_parent_backs_off_before_planning() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let plan_calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ImportRegistry::new();
    registry.register(Arc::new(GatedPlan {
        inner: Box::new(siphon_import::strategies::RawLineItems),
        gate: gate.clone(),
        plan_calls: plan_calls.clone(),
    }));
    let harness = harness_with_registry(registry);

    let source = line_items_source(&harness, 300);
    let job = harness.submit(ImportType::RawLineItems, source).await;
    let parent = harness.runtime.queue.poll_batch(1).await.unwrap().remove(0);

    // The first delivery takes the planning claim, then parks inside
    // the strategy while the job is still RUNNING with no plan set.
    let winner = {
        let runtime = harness.runtime.clone();
        tokio::spawn(async move { handle_delivery(&runtime, parent).await })
    };
    while plan_calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    // A duplicate arriving now passes the terminal/planned guards, so
    // only the claim keeps it out of the destructive dataset reset.
    harness.runtime.handle_parent(job.id).await.unwrap();
    assert_eq!(plan_calls.load(Ordering::SeqCst), 1);

    gate.add_permits(1);
    winner.await.unwrap();
    harness.drain().await;

    // A straggler resuming after completion must leave the rows alone.
    harness.runtime.handle_parent(job.id).await.unwrap();

    let job = harness.store.get(job.id).await.unwrap();
    assert_eq!(job.status, ImportJobStatus::Succeeded);
    assert_eq!(job.result.unwrap()["rowCount"], 300);
    assert_eq!(harness.sink.rows("raw_line_items").len(), 300);
}
