//! Operation request types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ErrorCode;

/// Identifier returned when an operation is accepted.
///
/// Handles start at 1, strictly increase and are never reused within a
/// service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

impl Handle {
    /// Create a new handle.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw handle value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
    Mkdir,
    Rename,
    SetPermissions,
}

impl OperationKind {
    /// Whether the operation reports a single boolean result rather than a
    /// per-path batch result.
    pub fn is_single_path(self) -> bool {
        matches!(self, Self::Mkdir | Self::Rename | Self::SetPermissions)
    }

    /// The code reported when the operation fails without a more specific one.
    pub fn failure_code(self) -> ErrorCode {
        match self {
            Self::Copy => ErrorCode::CopyFailed,
            Self::Move => ErrorCode::MoveFailed,
            Self::Delete => ErrorCode::DeleteFailed,
            Self::Mkdir => ErrorCode::FolderCreationFailed,
            Self::Rename => ErrorCode::RenameFailed,
            Self::SetPermissions => ErrorCode::ChmodFailed,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
            Self::Delete => write!(f, "Delete"),
            Self::Mkdir => write!(f, "Create directory"),
            Self::Rename => write!(f, "Rename"),
            Self::SetPermissions => write!(f, "Set permissions"),
        }
    }
}

/// A file operation to be executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Copy files/directories into a destination directory.
    Copy {
        paths: Vec<PathBuf>,
        destination: PathBuf,
    },
    /// Move files/directories into a destination directory.
    Move {
        paths: Vec<PathBuf>,
        destination: PathBuf,
    },
    /// Delete files/directories.
    Delete { paths: Vec<PathBuf> },
    /// Create directory `name` inside `destination`.
    Mkdir { name: PathBuf, destination: PathBuf },
    /// Rename a single entry to a new full path.
    Rename { old_path: PathBuf, new_path: PathBuf },
    /// Change the permission bits of a single entry.
    SetPermissions { path: PathBuf, mask: u32 },
}

impl Operation {
    /// Create a copy operation.
    pub fn copy(paths: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Copy {
            paths,
            destination: destination.into(),
        }
    }

    /// Create a move operation.
    pub fn move_to(paths: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Move {
            paths,
            destination: destination.into(),
        }
    }

    /// Create a delete operation.
    pub fn delete(paths: Vec<PathBuf>) -> Self {
        Self::Delete { paths }
    }

    /// Create a directory creation operation.
    pub fn mkdir(name: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Mkdir {
            name: name.into(),
            destination: destination.into(),
        }
    }

    /// Create a rename operation.
    pub fn rename(old_path: impl Into<PathBuf>, new_path: impl Into<PathBuf>) -> Self {
        Self::Rename {
            old_path: old_path.into(),
            new_path: new_path.into(),
        }
    }

    /// Create a permission change operation.
    pub fn set_permissions(path: impl Into<PathBuf>, mask: u32) -> Self {
        Self::SetPermissions {
            path: path.into(),
            mask,
        }
    }

    /// The kind of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Copy { .. } => OperationKind::Copy,
            Self::Move { .. } => OperationKind::Move,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Mkdir { .. } => OperationKind::Mkdir,
            Self::Rename { .. } => OperationKind::Rename,
            Self::SetPermissions { .. } => OperationKind::SetPermissions,
        }
    }

    /// The ordered source paths results are reported against.
    pub fn source_paths(&self) -> &[PathBuf] {
        match self {
            Self::Copy { paths, .. } | Self::Move { paths, .. } | Self::Delete { paths } => paths,
            Self::Mkdir { name, .. } => std::slice::from_ref(name),
            Self::Rename { old_path, .. } => std::slice::from_ref(old_path),
            Self::SetPermissions { path, .. } => std::slice::from_ref(path),
        }
    }

    /// The destination path, if the operation has one.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            Self::Copy { destination, .. }
            | Self::Move { destination, .. }
            | Self::Mkdir { destination, .. } => Some(destination),
            Self::Rename { new_path, .. } => Some(new_path),
            Self::Delete { .. } | Self::SetPermissions { .. } => None,
        }
    }

    /// Check the request for structural problems.
    ///
    /// Paths travel over a newline-delimited text protocol, so they must be
    /// valid UTF-8 and free of line breaks.
    pub fn validate(&self) -> Result<(), String> {
        let paths = self.source_paths();
        if paths.is_empty() {
            return Err("No paths given".into());
        }
        for path in paths.iter().map(PathBuf::as_path).chain(self.destination()) {
            validate_path(path)?;
        }
        if let Self::Mkdir { name, .. } = self {
            let single = name.components().count() == 1 && name.file_name().is_some();
            if !single {
                return Err(format!("'{}' is not a single directory name", name.display()));
            }
        }
        Ok(())
    }
}

fn validate_path(path: &Path) -> Result<(), String> {
    let Some(text) = path.to_str() else {
        return Err(format!("Path is not valid UTF-8: {}", path.display()));
    };
    if text.is_empty() {
        return Err("Path cannot be empty".into());
    }
    if text.contains(['\n', '\r', '\0']) {
        return Err(format!("Path contains a line break or NUL: {text:?}"));
    }
    Ok(())
}

/// Identity an operation should run under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAs {
    /// Login name of the target user.
    pub user: String,
}

impl RunAs {
    /// Run as the named user.
    pub fn user(name: impl Into<String>) -> Self {
        Self { user: name.into() }
    }
}

/// A queued request: an operation bound to its handle.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub handle: Handle,
    pub operation: Operation,
    /// When set, the operation runs in a forked child under this identity.
    pub run_as: Option<RunAs>,
}

impl OperationRequest {
    /// Create a new request.
    pub fn new(handle: Handle, operation: Operation, run_as: Option<RunAs>) -> Self {
        Self {
            handle,
            operation,
            run_as,
        }
    }

    /// Whether this request needs the privilege-separation executor.
    pub fn is_privileged(&self) -> bool {
        self.run_as.is_some()
    }
}
