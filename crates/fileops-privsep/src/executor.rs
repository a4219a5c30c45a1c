//! Fork-based executor running one operation under another identity.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use fileops_core::{ErrorCode, Operation, OperationKind, OperationOutcome, RunAs};
use fileops_ops::{CancellationToken, run_operation};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork, pipe};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::identity::TargetIdentity;
use crate::protocol::{LineAssembler, Record};

/// Serializes pipe creation and fork so that no child inherits the write
/// end of another executor's result pipe.
static FORK_LOCK: Mutex<()> = Mutex::new(());

const READ_CHUNK: usize = 4096;

/// How often the parent looks at the cancellation token while the child
/// is silent, in milliseconds.
const CANCEL_POLL_MS: u16 = 10;

/// Exit status of a child whose operation completed.
const EXIT_OK: i32 = 0;
/// Exit status of a child that could not adopt the target identity.
const EXIT_SETUP_FAILED: i32 = 1;
/// Exit status of a child whose operation reported a failure.
const EXIT_OPERATION_FAILED: i32 = 2;

/// Failures of the parent side of the executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to create pipe: {0}")]
    Pipe(#[source] nix::Error),

    #[error("failed to fork: {0}")]
    Fork(#[source] nix::Error),

    #[error("failed to wait for child {pid}: {source}")]
    Wait {
        pid: Pid,
        #[source]
        source: nix::Error,
    },
}

/// Runs one operation at a time in a forked child process.
///
/// The call blocks the invoking thread until the child has exited. Each
/// worker owns its own executor; a reentrant call while an operation is
/// running fails with [`ErrorCode::OperationInProgress`].
#[derive(Debug, Default)]
pub struct PrivilegedExecutor {
    busy: AtomicBool,
}

impl PrivilegedExecutor {
    /// Create an idle executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run `operation` in a child process, optionally as `run_as`.
    ///
    /// Cancelling `cancel` while the child runs is forwarded to it; the child
    /// stops at its next checkpoint and reports the remaining paths as
    /// cancelled.
    pub fn execute(
        &self,
        operation: &Operation,
        run_as: Option<&RunAs>,
        cancel: &CancellationToken,
    ) -> OperationOutcome {
        let paths = operation.source_paths();

        if self.busy.swap(true, Ordering::AcqRel) {
            warn!(kind = %operation.kind(), "privileged executor already busy");
            return OperationOutcome::all_failed(paths, ErrorCode::OperationInProgress);
        }
        let _busy = BusyGuard(&self.busy);

        if cancel.is_cancelled() {
            return OperationOutcome::all_failed(paths, ErrorCode::OperationCancelled);
        }

        let identity = TargetIdentity::resolve(run_as);
        match run_in_child(operation, &identity, cancel) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(kind = %operation.kind(), error = %e, "privileged execution failed");
                OperationOutcome::all_failed(paths, operation.kind().failure_code())
            }
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn run_in_child(
    operation: &Operation,
    identity: &TargetIdentity,
    cancel: &CancellationToken,
) -> Result<OperationOutcome, ExecutorError> {
    let guard = FORK_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let (read_end, write_end) = pipe().map_err(ExecutorError::Pipe)?;
    let (cancel_read, cancel_write) = pipe().map_err(ExecutorError::Pipe)?;

    // SAFETY: the child only adopts credentials, runs the engine without
    // logging and leaves through `_exit`.
    match unsafe { fork() }.map_err(ExecutorError::Fork)? {
        ForkResult::Child => {
            drop(read_end);
            drop(cancel_write);
            let status = child_main(
                operation,
                identity,
                File::from(write_end),
                File::from(cancel_read),
            );
            // SAFETY: `_exit` skips destructors and atexit handlers that
            // belong to the parent.
            unsafe { libc::_exit(status) }
        }
        ForkResult::Parent { child } => {
            drop(write_end);
            drop(cancel_read);
            drop(guard);
            debug!(pid = %child, kind = %operation.kind(), "spawned executor child");

            let outcome = read_outcome(
                File::from(read_end),
                File::from(cancel_write),
                operation,
                cancel,
            );
            if let Err(e) = wait_for(child) {
                warn!(error = %e, "could not reap executor child");
            }
            Ok(outcome)
        }
    }
}

fn child_main(
    operation: &Operation,
    identity: &TargetIdentity,
    mut out: File,
    cancel_input: File,
) -> i32 {
    tracing::subscriber::with_default(tracing::subscriber::NoSubscriber::default(), || {
        if identity.adopt().is_err() {
            let _ = out.write_all(Record::setup_error(ErrorCode::UserChangeFailed).encode().as_bytes());
            return EXIT_SETUP_FAILED;
        }

        let cancel = CancellationToken::new();
        // Without the watcher the operation still runs, just uncancellable.
        let _ = watch_cancellation(cancel_input, cancel.clone());

        let kind = operation.kind();
        let mut failed: Vec<PathBuf> = Vec::new();
        let code = run_operation(operation, &cancel, |path: &Path, ok| {
            let line = match (ok, kind) {
                (true, OperationKind::Delete) => Some(Record::Deleted(path.to_path_buf())),
                (true, k) if k.is_single_path() => Some(Record::True),
                (true, _) => Some(Record::Completed(path.to_path_buf())),
                (false, _) => {
                    if !kind.is_single_path() {
                        failed.push(path.to_path_buf());
                    }
                    None
                }
            };
            if let Some(record) = line {
                let _ = out.write_all(record.encode().as_bytes());
            }
        });

        // Failure codes are only known once the batch has returned.
        for path in &failed {
            let _ = out.write_all(Record::error(code, path).encode().as_bytes());
        }
        if !kind.is_single_path() && code.is_ok() && failed.is_empty() {
            let _ = out.write_all(Record::Done.encode().as_bytes());
        }

        if code.is_ok() { EXIT_OK } else { EXIT_OPERATION_FAILED }
    })
}

/// Cancel `token` once the parent writes to `input` or goes away.
fn watch_cancellation(mut input: File, token: CancellationToken) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("cancel-watch".to_string())
        .spawn(move || {
            let mut byte = [0u8; 1];
            while let Err(e) = input.read(&mut byte) {
                if e.kind() != ErrorKind::Interrupted {
                    break;
                }
            }
            token.cancel();
        })
        .map(drop)
}

fn read_outcome(
    mut input: File,
    mut cancel_output: File,
    operation: &Operation,
    cancel: &CancellationToken,
) -> OperationOutcome {
    let mut collector = OutcomeCollector::new(operation);
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; READ_CHUNK];
    let mut forwarded = false;

    loop {
        if !forwarded && cancel.is_cancelled() {
            debug!(kind = %operation.kind(), "forwarding cancellation to executor child");
            if let Err(e) = cancel_output.write_all(&[1]) {
                warn!(error = %e, "could not signal executor child");
            }
            forwarded = true;
        }

        let timeout = if forwarded {
            PollTimeout::NONE
        } else {
            PollTimeout::from(CANCEL_POLL_MS)
        };
        match wait_readable(&input, timeout) {
            Ok(true) => {}
            Ok(false) | Err(Errno::EINTR) => continue,
            // Fall back to a plain blocking read.
            Err(e) => warn!(error = %e, "polling executor pipe failed"),
        }

        match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for line in assembler.push(&buf[..n]) {
                    match Record::parse(&line) {
                        Ok(record) => collector.apply(record),
                        Err(e) => warn!(error = %e, "ignoring executor line"),
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "reading executor pipe failed");
                break;
            }
        }
    }

    if let Some(fragment) = assembler.finish() {
        warn!(fragment = %fragment, "discarding unterminated executor output");
    }

    collector.finish()
}

/// Wait until `input` has data or has been closed.
fn wait_readable(input: &File, timeout: PollTimeout) -> nix::Result<bool> {
    let mut fds = [PollFd::new(input.as_fd(), PollFlags::POLLIN)];
    Ok(poll(&mut fds, timeout)? > 0)
}

fn wait_for(pid: Pid) -> Result<(), ExecutorError> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, EXIT_OK)) => {
                debug!(pid = %pid, "executor child exited");
                return Ok(());
            }
            Ok(WaitStatus::Exited(_, status)) => {
                warn!(pid = %pid, status, "executor child exited with failure");
                return Ok(());
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                warn!(pid = %pid, signal = ?signal, "executor child killed by signal");
                return Ok(());
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(source) => return Err(ExecutorError::Wait { pid, source }),
        }
    }
}

/// Rebuilds an [`OperationOutcome`] from the records a child emitted.
///
/// Every path the child finished is reported explicitly, so a child that dies
/// mid-batch only fails the paths it never got to.
pub(crate) struct OutcomeCollector<'a> {
    operation: &'a Operation,
    outcome: OperationOutcome,
    saw_terminal: bool,
}

impl<'a> OutcomeCollector<'a> {
    pub(crate) fn new(operation: &'a Operation) -> Self {
        Self {
            operation,
            outcome: OperationOutcome::new(),
            saw_terminal: false,
        }
    }

    pub(crate) fn apply(&mut self, record: Record) {
        match record {
            Record::Deleted(path) | Record::Completed(path) => self.outcome.record(&path, true),
            Record::True => {
                if let Some(path) = self.operation.source_paths().first() {
                    if !self.outcome.contains(path) {
                        self.outcome.record(path, true);
                    }
                }
            }
            Record::Done => {
                self.saw_terminal = true;
                self.settle_unreported(true);
            }
            Record::Error { code, path } => {
                self.saw_terminal = true;
                if self.outcome.error.is_ok() {
                    self.outcome.error = code;
                }
                match path {
                    Some(path) => self.outcome.record(&path, false),
                    None => self.settle_unreported(false),
                }
            }
        }
    }

    pub(crate) fn finish(mut self) -> OperationOutcome {
        let kind = self.operation.kind();
        let complete = self.saw_terminal && !kind.is_single_path();
        if !complete && self.outcome.error.is_ok() && self.has_unreported() {
            self.outcome.error = kind.failure_code();
        }
        self.settle_unreported(complete);
        self.outcome
    }

    fn has_unreported(&self) -> bool {
        self.operation
            .source_paths()
            .iter()
            .any(|p| !self.outcome.contains(p))
    }

    fn settle_unreported(&mut self, success: bool) {
        for path in self.operation.source_paths() {
            if !self.outcome.contains(path) {
                self.outcome.record(path, success);
            }
        }
    }
}
