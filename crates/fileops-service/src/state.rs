//! Bookkeeping table of issued handles.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use fileops_core::{ErrorCode, Handle, OperationKind, OperationOutcome, OperationRequest};
use fileops_ops::CancellationToken;

use crate::error::{ServiceError, ServiceResult};

/// Lifecycle stage of an issued handle. Retired handles have no entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Pending,
    InFlight,
    Completed,
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub stage: Stage,
    pub kind: OperationKind,
    pub paths: Vec<PathBuf>,
    pub cancel: CancellationToken,
    pub outcome: Option<OperationOutcome>,
}

impl Entry {
    pub fn pending(kind: OperationKind, paths: Vec<PathBuf>) -> Self {
        Self {
            stage: Stage::Pending,
            kind,
            paths,
            cancel: CancellationToken::new(),
            outcome: None,
        }
    }

    /// An entry that is finished before it was ever queued.
    pub fn rejected(kind: OperationKind, paths: Vec<PathBuf>, error: ErrorCode) -> Self {
        let outcome = OperationOutcome::all_failed(&paths, error);
        Self {
            stage: Stage::Completed,
            kind,
            paths,
            cancel: CancellationToken::new(),
            outcome: Some(outcome),
        }
    }
}

/// What [`Table::cancel`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelAction {
    Unknown,
    /// The request was taken off the pending queue and is now completed.
    Dequeued,
    /// The running worker was signalled.
    Signalled,
    AlreadyCompleted,
}

#[derive(Debug, Default)]
pub(crate) struct Table {
    last_handle: u32,
    entries: HashMap<Handle, Entry>,
    /// Requests not yet taken by a worker, oldest first.
    pending: VecDeque<OperationRequest>,
    pub shutting_down: bool,
}

impl Table {
    pub fn allocate(&mut self) -> ServiceResult<Handle> {
        let next = self
            .last_handle
            .checked_add(1)
            .ok_or(ServiceError::HandlesExhausted)?;
        self.last_handle = next;
        Ok(Handle::new(next))
    }

    pub fn insert(&mut self, handle: Handle, entry: Entry) {
        self.entries.insert(handle, entry);
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Entry> {
        self.entries.remove(&handle)
    }

    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    /// Number of requests waiting for a worker.
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// Register `request` and append it to the pending queue.
    pub fn enqueue(&mut self, request: OperationRequest) {
        let entry = Entry::pending(
            request.operation.kind(),
            request.operation.source_paths().to_vec(),
        );
        self.entries.insert(request.handle, entry);
        self.pending.push_back(request);
    }

    /// Take the oldest pending request and move it to in-flight, returning
    /// its token.
    pub fn dequeue(&mut self) -> Option<(OperationRequest, CancellationToken)> {
        if self.shutting_down {
            return None;
        }
        while let Some(request) = self.pending.pop_front() {
            match self.entries.get_mut(&request.handle) {
                Some(entry) if entry.stage == Stage::Pending => {
                    entry.stage = Stage::InFlight;
                    let cancel = entry.cancel.clone();
                    return Some((request, cancel));
                }
                _ => continue,
            }
        }
        None
    }

    /// Store the outcome of an in-flight request.
    pub fn complete(&mut self, handle: Handle, outcome: OperationOutcome) -> bool {
        match self.entries.get_mut(&handle) {
            Some(entry) if entry.stage == Stage::InFlight => {
                entry.stage = Stage::Completed;
                entry.outcome = Some(outcome);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self, handle: Handle) -> CancelAction {
        let Some(entry) = self.entries.get_mut(&handle) else {
            return CancelAction::Unknown;
        };
        match entry.stage {
            Stage::Pending => {
                self.pending.retain(|request| request.handle != handle);
                entry.stage = Stage::Completed;
                entry.outcome = Some(OperationOutcome::all_failed(
                    &entry.paths,
                    ErrorCode::OperationCancelled,
                ));
                CancelAction::Dequeued
            }
            Stage::InFlight => {
                entry.cancel.cancel();
                CancelAction::Signalled
            }
            Stage::Completed => CancelAction::AlreadyCompleted,
        }
    }

    /// Cancel every running request and drain the table in handle order.
    ///
    /// Entries without an outcome are reported as cancelled.
    pub fn drain(&mut self) -> Vec<(Handle, OperationOutcome)> {
        self.pending.clear();
        let mut drained: Vec<_> = self
            .entries
            .drain()
            .map(|(handle, entry)| {
                entry.cancel.cancel();
                let outcome = entry.outcome.unwrap_or_else(|| {
                    OperationOutcome::all_failed(&entry.paths, ErrorCode::OperationCancelled)
                });
                (handle, outcome)
            })
            .collect();
        drained.sort_by_key(|(handle, _)| *handle);
        drained
    }

    pub fn cancel_all(&self) {
        for entry in self.entries.values() {
            entry.cancel.cancel();
        }
    }
}
