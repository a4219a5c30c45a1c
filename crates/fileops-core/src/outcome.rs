//! Per-operation results and the notifications derived from them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ErrorCode, Handle, OperationKind};

/// Collected per-path results of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// Final outcome code.
    pub error: ErrorCode,
    /// Paths that were processed successfully, in report order.
    pub succeeded: Vec<PathBuf>,
    /// Paths that failed or were never processed, in report order.
    pub failed: Vec<PathBuf>,
}

impl OperationOutcome {
    /// Create an empty outcome.
    pub fn new() -> Self {
        Self::default()
    }

    /// An outcome where every path failed with `error`.
    pub fn all_failed(paths: &[PathBuf], error: ErrorCode) -> Self {
        Self {
            error,
            succeeded: Vec::new(),
            failed: paths.to_vec(),
        }
    }

    /// Record the result for a single path.
    pub fn record(&mut self, path: &Path, success: bool) {
        if success {
            self.succeeded.push(path.to_path_buf());
        } else {
            self.failed.push(path.to_path_buf());
        }
    }

    /// Whether any result has been recorded for `path`.
    pub fn contains(&self, path: &Path) -> bool {
        self.succeeded.iter().chain(&self.failed).any(|p| p == path)
    }

    /// Check if the operation was fully successful.
    pub fn is_success(&self) -> bool {
        self.error.is_ok() && self.failed.is_empty()
    }

    /// The notifications this outcome produces, in delivery order.
    ///
    /// `Succeeded` and `Failed` are only present when they carry paths;
    /// `Finished` is always last.
    pub fn events(&self, handle: Handle) -> Vec<ServiceEvent> {
        let mut events = Vec::with_capacity(3);
        if !self.succeeded.is_empty() {
            events.push(ServiceEvent::Succeeded {
                handle,
                paths: self.succeeded.clone(),
            });
        }
        if !self.failed.is_empty() {
            events.push(ServiceEvent::Failed {
                handle,
                paths: self.failed.clone(),
                error: self.error,
            });
        }
        events.push(ServiceEvent::Finished { handle });
        events
    }

    /// Get a human-readable summary of the operation.
    pub fn summary(&self, kind: OperationKind) -> String {
        let action = match kind {
            OperationKind::Copy => "Copied",
            OperationKind::Move => "Moved",
            OperationKind::Delete => "Deleted",
            OperationKind::Mkdir => "Created",
            OperationKind::Rename => "Renamed",
            OperationKind::SetPermissions => "Updated",
        };

        if self.failed.is_empty() {
            format!("{} {} items", action, self.succeeded.len())
        } else {
            format!(
                "{} {} items, {} failed ({})",
                action,
                self.succeeded.len(),
                self.failed.len(),
                self.error
            )
        }
    }
}

/// Notification emitted by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServiceEvent {
    /// At least one path of the operation succeeded.
    Succeeded { handle: Handle, paths: Vec<PathBuf> },
    /// At least one path of the operation failed or was not processed.
    Failed {
        handle: Handle,
        paths: Vec<PathBuf>,
        error: ErrorCode,
    },
    /// All notifications for the handle have been delivered.
    Finished { handle: Handle },
    /// The service shut itself down after its idle linger period.
    Expired,
}

impl ServiceEvent {
    /// The handle this event refers to, if any.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Self::Succeeded { handle, .. }
            | Self::Failed { handle, .. }
            | Self::Finished { handle } => Some(*handle),
            Self::Expired => None,
        }
    }
}
