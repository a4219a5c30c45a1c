//! Worker tasks draining the request queue.

use std::sync::Arc;

use fileops_core::{OperationOutcome, OperationRequest};
use fileops_ops::{CancellationToken, execute};
use fileops_privsep::PrivilegedExecutor;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, trace};

use crate::service::Shared;

/// A signal on the shared work channel. Requests themselves wait in the
/// dispatcher table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkItem {
    /// A request was queued.
    Ready,
    /// Tells exactly one worker to exit.
    Shutdown,
}

pub(crate) type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>;

pub(crate) async fn run_worker(id: usize, shared: Arc<Shared>, queue: SharedQueue) {
    let executor = Arc::new(PrivilegedExecutor::new());
    debug!(worker = id, "worker started");

    loop {
        let item = {
            let mut rx = queue.lock().await;
            tokio::select! {
                biased;
                _ = shared.stop.cancelled() => None,
                item = rx.recv() => item,
            }
        };

        match item {
            Some(WorkItem::Ready) => {}
            Some(WorkItem::Shutdown) | None => break,
        }

        // Requests cancelled while pending leave their wake-up behind.
        let Some((request, cancel)) = shared.dequeue() else {
            trace!(worker = id, "nothing pending");
            continue;
        };
        let handle = request.handle;

        debug!(worker = id, handle = %handle, kind = %request.operation.kind(), "processing request");
        let fallback_paths = request.operation.source_paths().to_vec();
        let fallback_code = request.operation.kind().failure_code();
        let executor = Arc::clone(&executor);

        let outcome = tokio::task::spawn_blocking(move || process(&request, &cancel, &executor))
            .await
            .unwrap_or_else(|e| {
                error!(worker = id, handle = %handle, error = %e, "operation task failed");
                OperationOutcome::all_failed(&fallback_paths, fallback_code)
            });

        shared.complete(handle, outcome);
    }

    debug!(worker = id, "worker stopped");
}

fn process(
    request: &OperationRequest,
    cancel: &CancellationToken,
    executor: &PrivilegedExecutor,
) -> OperationOutcome {
    match &request.run_as {
        Some(run_as) => executor.execute(&request.operation, Some(run_as), cancel),
        None => execute(&request.operation, cancel),
    }
}
