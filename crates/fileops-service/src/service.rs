//! The dispatcher: handle issuance, cancellation routing, notifications and
//! idle expiry.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use fileops_core::{
    ErrorCode, Handle, Operation, OperationOutcome, OperationRequest, RunAs, ServiceConfig,
    ServiceEvent,
};
use fileops_ops::CancellationToken;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::state::{CancelAction, Entry, Table};
use crate::worker::{SharedQueue, WorkItem, run_worker};

/// Messages for the control loop.
#[derive(Debug)]
enum Control {
    /// A request was accepted; disarms the idle timer.
    Activity,
    /// The handle reached `Completed` and can be reported and retired.
    Completed(Handle),
}

/// State shared between the service front end, the control loop and the
/// workers.
pub(crate) struct Shared {
    table: Mutex<Table>,
    queue_capacity: usize,
    queue: mpsc::UnboundedSender<WorkItem>,
    control: mpsc::UnboundedSender<Control>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ServiceEvent>>>,
    /// Stops the control loop and every worker.
    pub(crate) stop: CancellationToken,
    terminated: CancellationToken,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<ServiceEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn dequeue(&self) -> Option<(OperationRequest, CancellationToken)> {
        self.table().dequeue()
    }

    pub(crate) fn complete(&self, handle: Handle, outcome: OperationOutcome) {
        let mut table = self.table();
        if table.complete(handle, outcome) {
            let _ = self.control.send(Control::Completed(handle));
        } else {
            debug!(handle = %handle, "dropping result of retired request");
        }
    }

    fn publish(&self, handle: Handle, outcome: &OperationOutcome) {
        self.broadcast(outcome.events(handle));
    }

    /// Deliver `events` to every live subscriber, dropping closed ones.
    fn broadcast(&self, events: impl IntoIterator<Item = ServiceEvent>) {
        let mut subscribers = self.subscribers();
        for event in events {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Close every subscriber stream once no further events can follow.
    fn close_subscribers(&self) {
        self.subscribers().clear();
    }
}

/// Asynchronous file operation service.
///
/// Requests are accepted immediately and answered with a [`Handle`]; results
/// arrive later as [`ServiceEvent`]s on every [`subscribe`](Self::subscribe)d
/// receiver. A service must be created inside a tokio runtime.
pub struct FileOperationsService {
    shared: Arc<Shared>,
    default_run_as: Option<RunAs>,
    tasks: Vec<JoinHandle<()>>,
}

impl FileOperationsService {
    /// Start the control loop and the worker pool.
    pub fn new(config: ServiceConfig) -> ServiceResult<Self> {
        if config.queue_capacity == 0 {
            return Err(ServiceError::Config(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            table: Mutex::new(Table::default()),
            queue_capacity: config.queue_capacity,
            queue: queue_tx,
            control: control_tx,
            subscribers: Mutex::new(Vec::new()),
            stop: CancellationToken::new(),
            terminated: CancellationToken::new(),
        });

        let workers = config.worker_count();
        let queue: SharedQueue = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let mut tasks = Vec::with_capacity(workers + 1);
        for id in 0..workers {
            tasks.push(tokio::spawn(run_worker(
                id,
                Arc::clone(&shared),
                Arc::clone(&queue),
            )));
        }
        tasks.push(tokio::spawn(control_loop(
            Arc::clone(&shared),
            control_rx,
            config.clone(),
            workers,
        )));

        info!(
            workers,
            queue_capacity = config.queue_capacity,
            linger_ms = config.linger_ms,
            "file operations service started"
        );

        Ok(Self {
            shared,
            default_run_as: config.run_as.map(RunAs::user),
            tasks,
        })
    }

    /// Copy `paths` into `destination`.
    pub fn copy(&self, paths: Vec<PathBuf>, destination: impl Into<PathBuf>) -> ServiceResult<Handle> {
        self.submit(Operation::copy(paths, destination), None)
    }

    /// Move `paths` into `destination`.
    pub fn move_to(
        &self,
        paths: Vec<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> ServiceResult<Handle> {
        self.submit(Operation::move_to(paths, destination), None)
    }

    /// Delete `paths`.
    pub fn delete(&self, paths: Vec<PathBuf>) -> ServiceResult<Handle> {
        self.submit(Operation::delete(paths), None)
    }

    /// Create directory `name` inside `destination`.
    pub fn mkdir(&self, name: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> ServiceResult<Handle> {
        self.submit(Operation::mkdir(name, destination), None)
    }

    /// Rename `old_path` to `new_path`.
    pub fn rename(&self, old_path: impl Into<PathBuf>, new_path: impl Into<PathBuf>) -> ServiceResult<Handle> {
        self.submit(Operation::rename(old_path, new_path), None)
    }

    /// Set the permission bits of `path`.
    pub fn set_permissions(&self, path: impl Into<PathBuf>, mask: u32) -> ServiceResult<Handle> {
        self.submit(Operation::set_permissions(path, mask), None)
    }

    /// Queue `operation`, optionally under another identity.
    ///
    /// Without an explicit identity the configured default applies. Invalid
    /// requests are still accepted and finish with
    /// [`ErrorCode::InvalidRequest`].
    pub fn submit(&self, operation: Operation, run_as: Option<RunAs>) -> ServiceResult<Handle> {
        let run_as = run_as.or_else(|| self.default_run_as.clone());
        let kind = operation.kind();

        let mut table = self.shared.table();
        if table.shutting_down {
            return Err(ServiceError::ShuttingDown);
        }
        let handle = table.allocate()?;

        if let Err(reason) = operation.validate() {
            warn!(handle = %handle, kind = %kind, reason = %reason, "rejecting invalid request");
            let paths = operation.source_paths().to_vec();
            table.insert(handle, Entry::rejected(kind, paths, ErrorCode::InvalidRequest));
            let _ = self.shared.control.send(Control::Activity);
            let _ = self.shared.control.send(Control::Completed(handle));
            return Ok(handle);
        }

        if table.queued() >= self.shared.queue_capacity {
            warn!(handle = %handle, "request queue full");
            return Err(ServiceError::QueueFull);
        }
        if self.shared.queue.send(WorkItem::Ready).is_err() {
            return Err(ServiceError::ShuttingDown);
        }
        table.enqueue(OperationRequest::new(handle, operation, run_as));
        // Sent under the lock so it always precedes this handle's completion.
        let _ = self.shared.control.send(Control::Activity);

        debug!(handle = %handle, kind = %kind, "request queued");
        Ok(handle)
    }

    /// Cancel the operation behind `handle`.
    ///
    /// A queued request is completed as cancelled without running; a running
    /// one stops at its next checkpoint. Unknown handles are ignored.
    pub fn cancel(&self, handle: Handle) {
        let mut table = self.shared.table();
        match table.cancel(handle) {
            CancelAction::Unknown => debug!(handle = %handle, "cancel for unknown handle"),
            CancelAction::Dequeued => {
                debug!(handle = %handle, "cancelled queued request");
                let _ = self.shared.control.send(Control::Completed(handle));
            }
            CancelAction::Signalled => debug!(handle = %handle, "signalled running request"),
            CancelAction::AlreadyCompleted => {
                debug!(handle = %handle, "cancel after completion")
            }
        }
    }

    /// Receive every notification emitted from now on.
    ///
    /// Each subscriber gets its own unbounded stream, so a slow reader never
    /// loses events. The stream ends after `Expired` or once the service has
    /// shut down.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ServiceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers().push(tx);
        rx
    }

    /// Token cancelled once the service has expired or been shut down.
    pub fn terminated(&self) -> CancellationToken {
        self.shared.terminated.clone()
    }

    /// Number of handles not yet retired.
    pub fn outstanding(&self) -> usize {
        self.shared.table().outstanding()
    }

    /// Stop accepting requests, cancel outstanding work and wait for every
    /// task to exit.
    ///
    /// Handles that never reported are finished as cancelled.
    pub async fn shutdown(mut self) {
        {
            let mut table = self.shared.table();
            table.shutting_down = true;
            table.cancel_all();
        }
        self.shared.stop.cancel();

        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(error = %e, "service task ended abnormally");
            }
        }

        let leftover = self.shared.table().drain();
        for (handle, outcome) in &leftover {
            self.shared.publish(*handle, outcome);
        }
        self.shared.close_subscribers();

        self.shared.terminated.cancel();
        info!(unfinished = leftover.len(), "file operations service stopped");
    }
}

impl Drop for FileOperationsService {
    fn drop(&mut self) {
        self.shared.stop.cancel();
    }
}

async fn control_loop(
    shared: Arc<Shared>,
    mut control: mpsc::UnboundedReceiver<Control>,
    config: ServiceConfig,
    workers: usize,
) {
    let linger = config.linger();
    let mut deadline = Some(Instant::now() + linger);

    loop {
        let idle = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shared.stop.cancelled() => break,
            message = control.recv() => match message {
                Some(Control::Activity) => deadline = None,
                Some(Control::Completed(handle)) => {
                    let (entry, outstanding) = {
                        let mut table = shared.table();
                        (table.remove(handle), table.outstanding())
                    };
                    if let Some(outcome) = entry.and_then(|e| e.outcome) {
                        debug!(handle = %handle, error = %outcome.error, "request finished");
                        shared.publish(handle, &outcome);
                    }
                    if outstanding == 0 {
                        deadline = Some(Instant::now() + linger);
                    }
                }
                None => break,
            },
            _ = idle => {
                if begin_expiry(&shared) {
                    expire(&shared, workers, &config).await;
                    break;
                }
                deadline = None;
            }
        }
    }
}

/// Set the shutdown flag if nothing is outstanding.
fn begin_expiry(shared: &Shared) -> bool {
    let mut table = shared.table();
    if table.outstanding() > 0 {
        return false;
    }
    table.shutting_down = true;
    true
}

async fn expire(shared: &Shared, workers: usize, config: &ServiceConfig) {
    info!(linger_ms = config.linger_ms, "service idle, expiring");

    for _ in 0..workers {
        if shared.queue.send(WorkItem::Shutdown).is_err() {
            break;
        }
    }

    tokio::time::sleep(config.shutdown_grace()).await;

    shared.broadcast([ServiceEvent::Expired]);
    shared.close_subscribers();
    shared.terminated.cancel();
}
