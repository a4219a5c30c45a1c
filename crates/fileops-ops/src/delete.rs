//! Delete operation.

use std::fs;
use std::path::{Path, PathBuf};

use fileops_core::{EntryError, ErrorCode};
use tokio_util::sync::CancellationToken;

use crate::batch::run_batch;

/// Delete a single entry.
///
/// A symlink is removed as a link, even when it points at a directory; a
/// real directory is removed recursively.
pub fn delete_entry(path: &Path) -> Result<(), EntryError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| EntryError::io(path, e))?;
    let file_type = metadata.file_type();

    let result = if file_type.is_dir() {
        fs::remove_dir_all(path)
    } else {
        remove_link_or_file(path, &metadata)
    };

    result.map_err(|e| EntryError::io(path, e))
}

#[cfg(windows)]
fn remove_link_or_file(path: &Path, metadata: &fs::Metadata) -> std::io::Result<()> {
    use std::os::windows::fs::FileTypeExt;

    if metadata.file_type().is_symlink_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(not(windows))]
fn remove_link_or_file(path: &Path, _metadata: &fs::Metadata) -> std::io::Result<()> {
    fs::remove_file(path)
}

/// Delete every path in order, stopping at the first failure.
pub fn delete_files<R>(paths: &[PathBuf], cancel: &CancellationToken, on_result: R) -> ErrorCode
where
    R: FnMut(&Path, bool),
{
    run_batch(paths, cancel, on_result, |path| {
        delete_entry(path).map_err(|_| ErrorCode::DeleteFailed)
    })
}
