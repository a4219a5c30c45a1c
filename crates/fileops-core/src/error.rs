//! Error types shared by the engine, the executor and the service.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome code reported for an operation.
///
/// The numeric values are part of the executor pipe protocol and of the
/// `Failed` notification payload, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    #[default]
    NoError = 0,
    OperationInProgress = 1,
    InvalidRequest = 2,
    CopyFailed = 3,
    FolderCopyFailed = 4,
    MoveFailed = 5,
    DeleteFailed = 6,
    FolderCreationFailed = 7,
    RenameFailed = 8,
    ChmodFailed = 9,
    CannotCopyIntoItself = 10,
    OperationCancelled = 11,
    UserChangeFailed = 12,
}

impl ErrorCode {
    /// All codes, in wire order.
    pub const ALL: [ErrorCode; 13] = [
        Self::NoError,
        Self::OperationInProgress,
        Self::InvalidRequest,
        Self::CopyFailed,
        Self::FolderCopyFailed,
        Self::MoveFailed,
        Self::DeleteFailed,
        Self::FolderCreationFailed,
        Self::RenameFailed,
        Self::ChmodFailed,
        Self::CannotCopyIntoItself,
        Self::OperationCancelled,
        Self::UserChangeFailed,
    ];

    /// The wire value of this code.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Look up a code by its wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Whether this code represents a successful outcome.
    pub fn is_ok(self) -> bool {
        self == Self::NoError
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NoError => "No error",
            Self::OperationInProgress => "Operation already in progress",
            Self::InvalidRequest => "Invalid request",
            Self::CopyFailed => "Copy failed",
            Self::FolderCopyFailed => "Folder copy failed",
            Self::MoveFailed => "Move failed",
            Self::DeleteFailed => "Delete failed",
            Self::FolderCreationFailed => "Folder creation failed",
            Self::RenameFailed => "Rename failed",
            Self::ChmodFailed => "Changing permissions failed",
            Self::CannotCopyIntoItself => "Cannot copy a folder into itself",
            Self::OperationCancelled => "Operation cancelled",
            Self::UserChangeFailed => "Switching user identity failed",
        };
        f.write_str(text)
    }
}

/// Failure of a single filesystem entry primitive.
#[derive(Debug, Error)]
pub enum EntryError {
    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cancellation token fired at a checkpoint.
    #[error("Operation cancelled")]
    Cancelled,
}

impl EntryError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether this error came from cancellation rather than the filesystem.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_error_io() {
        let err = EntryError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, EntryError::PermissionDenied { .. }));

        let err = EntryError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, EntryError::NotFound { .. }));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_error_code_wire_values() {
        for (index, code) in ErrorCode::ALL.iter().enumerate() {
            assert_eq!(code.as_u32() as usize, index);
            assert_eq!(ErrorCode::from_u32(index as u32), Some(*code));
        }
        assert_eq!(ErrorCode::UserChangeFailed.as_u32(), 12);
        assert_eq!(ErrorCode::from_u32(13), None);
    }
}
