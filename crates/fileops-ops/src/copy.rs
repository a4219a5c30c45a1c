//! Copy operation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fileops_core::{EntryError, ErrorCode};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::{is_into_itself, run_batch, target_in};

/// Copy a single non-directory entry, replacing whatever is at `dest`.
///
/// A symlink is reproduced as a new link with the same target string
/// rather than copied by content. Returns the number of bytes copied.
pub fn copy_overwrite(source: &Path, dest: &Path) -> Result<u64, EntryError> {
    if fs::symlink_metadata(dest).is_ok() {
        fs::remove_file(dest).map_err(|e| EntryError::io(dest, e))?;
    }

    let metadata = fs::symlink_metadata(source).map_err(|e| EntryError::io(source, e))?;
    if metadata.file_type().is_symlink() {
        copy_symlink(source, dest)?;
        return Ok(0);
    }

    fs::copy(source, dest).map_err(|e| EntryError::io(source, e))
}

/// Create a link at `dest` pointing at the same target as the link `source`.
pub fn copy_symlink(source: &Path, dest: &Path) -> Result<(), EntryError> {
    let target = fs::read_link(source).map_err(|e| EntryError::io(source, e))?;
    create_symlink(&target, dest).map_err(|e| EntryError::io(dest, e))
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Recursively copy a directory tree.
///
/// Files (and links) are copied before subdirectories are descended into,
/// each in name order, and the cancellation token is checked before every
/// entry. The first failure aborts the copy; whatever was already written
/// to `dest` is left in place.
pub fn copy_tree(source: &Path, dest: &Path, cancel: &CancellationToken) -> Result<u64, EntryError> {
    let metadata = fs::symlink_metadata(source).map_err(|e| EntryError::io(source, e))?;
    if metadata.file_type().is_symlink() {
        copy_symlink(source, dest)?;
        return Ok(0);
    }
    if !metadata.is_dir() {
        return Err(EntryError::io(
            source,
            io::Error::new(io::ErrorKind::NotADirectory, "source is not a directory"),
        ));
    }

    if fs::symlink_metadata(dest).is_err() {
        fs::create_dir(dest).map_err(|e| EntryError::io(dest, e))?;
    }

    let (files, dirs) = list_entries(source)?;
    let mut total_bytes = 0u64;

    for name in files {
        if cancel.is_cancelled() {
            return Err(EntryError::Cancelled);
        }
        total_bytes += copy_overwrite(&source.join(&name), &dest.join(&name))?;
    }

    for name in dirs {
        if cancel.is_cancelled() {
            return Err(EntryError::Cancelled);
        }
        total_bytes += copy_tree(&source.join(&name), &dest.join(&name), cancel)?;
    }

    Ok(total_bytes)
}

/// Split the entries of `dir` into copyable leaves and real subdirectories.
///
/// Device nodes, FIFOs and sockets are skipped.
fn list_entries(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), EntryError> {
    let entries = fs::read_dir(dir).map_err(|e| EntryError::io(dir, e))?;

    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| EntryError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| EntryError::io(entry.path(), e))?;
        let name = PathBuf::from(entry.file_name());

        if file_type.is_dir() {
            dirs.push(name);
        } else if file_type.is_file() || file_type.is_symlink() {
            files.push(name);
        } else {
            debug!(path = %entry.path().display(), "skipping special file");
        }
    }

    files.sort();
    dirs.sort();
    Ok((files, dirs))
}

/// Copy every path into `destination`, stopping at the first failure.
pub fn copy_files<R>(
    paths: &[PathBuf],
    destination: &Path,
    cancel: &CancellationToken,
    on_result: R,
) -> ErrorCode
where
    R: FnMut(&Path, bool),
{
    run_batch(paths, cancel, on_result, |path| {
        let target = target_in(path, destination).ok_or(ErrorCode::CopyFailed)?;
        if is_into_itself(path, &target) {
            return Err(ErrorCode::CannotCopyIntoItself);
        }

        let metadata = fs::symlink_metadata(path).map_err(|_| ErrorCode::CopyFailed)?;
        if metadata.is_dir() {
            match copy_tree(path, &target, cancel) {
                Ok(bytes) => debug!(path = %path.display(), bytes, "directory copied"),
                Err(EntryError::Cancelled) => return Err(ErrorCode::OperationCancelled),
                Err(_) => return Err(ErrorCode::FolderCopyFailed),
            }
        } else {
            let bytes = copy_overwrite(path, &target).map_err(|_| ErrorCode::CopyFailed)?;
            debug!(path = %path.display(), bytes, "file copied");
        }
        Ok(())
    })
}
