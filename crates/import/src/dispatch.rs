//! Queue dispatch loop: decode deliveries, route them to the runtime,
//! and turn the outcome into ack/nack decisions.

use std::time::Duration;

use tracing::{error, info, warn};

use siphon_queue::{JobMessage, JobQueue, QueueDelivery};

use crate::runtime::ImportRuntime;

/// Process one delivery end to end.
///
/// Policy:
/// - undecodable body: ack (redelivery cannot fix it) and drop
/// - handler success: ack
/// - transient handler error: nack so the queue redelivers
/// - permanent handler error: fail the job, then ack; if failing the
///   job itself fails, nack so the delivery gets another try
pub async fn handle_delivery(runtime: &ImportRuntime, delivery: QueueDelivery) {
    let message = match JobMessage::decode(&delivery.body) {
        Ok(message) => message,
        Err(e) => {
            warn!(delivery_id = %delivery.id, error = %e, "dropping undecodable message");
            ack_or_log(runtime, &delivery).await;
            return;
        }
    };

    let job_id = message.job_id();
    let chunk_index = message.chunk_index();
    let result = match message {
        JobMessage::Parent { job_id } => runtime.handle_parent(job_id).await,
        JobMessage::Chunk { job_id, chunk_index, chunk_count, strategy, payload } => {
            runtime
                .handle_chunk(job_id, chunk_index, chunk_count, &strategy, payload)
                .await
        }
    };

    match result {
        Ok(()) => ack_or_log(runtime, &delivery).await,
        Err(e) if e.is_transient() => {
            warn!(
                job_id = %job_id,
                chunk_index,
                attempt = delivery.attempt_count,
                error = %e,
                "transient import error, returning message to queue"
            );
            if let Err(nack_err) = runtime.queue.nack(&delivery.receipt_handle).await {
                error!(job_id = %job_id, error = %nack_err, "nack failed");
            }
        }
        Err(e) => {
            error!(job_id = %job_id, chunk_index, error = %e, "permanent import error, failing job");
            let error_payload = serde_json::json!({
                "message": e.to_string(),
                "chunkIndex": chunk_index,
            });
            match runtime.store.mark_failed(job_id, error_payload).await {
                Ok(()) => ack_or_log(runtime, &delivery).await,
                Err(store_err) => {
                    // Could not record the failure; keep the message so
                    // a later delivery can.
                    error!(job_id = %job_id, error = %store_err, "mark_failed failed");
                    if let Err(nack_err) = runtime.queue.nack(&delivery.receipt_handle).await {
                        error!(job_id = %job_id, error = %nack_err, "nack failed");
                    }
                }
            }
        }
    }
}

async fn ack_or_log(runtime: &ImportRuntime, delivery: &QueueDelivery) {
    if let Err(e) = runtime.queue.ack(&delivery.receipt_handle).await {
        error!(delivery_id = %delivery.id, error = %e, "ack failed");
    }
}

/// Poll-and-dispatch loop for one worker. Runs until the task is
/// aborted; the process spawns `concurrency` of these.
pub async fn run_dispatcher(
    runtime: ImportRuntime,
    worker_id: usize,
    poll_interval: Duration,
    max_batch_size: u32,
) {
    info!(worker_id, "import worker started");
    loop {
        let deliveries = match runtime.queue.poll_batch(max_batch_size).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                warn!(worker_id, error = %e, "poll failed");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        if deliveries.is_empty() {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        for delivery in deliveries {
            handle_delivery(&runtime, delivery).await;
        }
    }
}
