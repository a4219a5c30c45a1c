//! Rename operation.

use std::fs;
use std::path::{Component, Path};

use fileops_core::ErrorCode;
use tracing::warn;

/// Rename `old_path` to the full path `new_path`.
///
/// An existing entry at `new_path` is never replaced.
pub fn rename_entry<R>(old_path: &Path, new_path: &Path, mut on_result: R) -> ErrorCode
where
    R: FnMut(&Path, bool),
{
    if new_path != old_path && fs::symlink_metadata(new_path).is_ok() {
        warn!(path = %new_path.display(), "rename target already exists");
        on_result(old_path, false);
        return ErrorCode::RenameFailed;
    }

    match fs::rename(old_path, new_path) {
        Ok(()) => {
            on_result(old_path, true);
            ErrorCode::NoError
        }
        Err(e) => {
            warn!(from = %old_path.display(), to = %new_path.display(), error = %e, "rename failed");
            on_result(old_path, false);
            ErrorCode::RenameFailed
        }
    }
}

/// Check that `name` can be created as a single entry inside a directory.
///
/// Accepts exactly one normal path component; `.` and `..` are refused.
/// Line breaks are refused too since paths travel over the executor pipe
/// one per line.
pub fn validate_filename(name: &str) -> Result<(), String> {
    const MAX_NAME_BYTES: usize = 255;

    if name.is_empty() {
        return Err("Name cannot be empty".into());
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(format!("Name is longer than {MAX_NAME_BYTES} bytes"));
    }
    if let Some(c) = name.chars().find(|&c| matches!(c, '/' | '\0' | '\n' | '\r')) {
        return Err(format!("Name cannot contain {c:?}"));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(format!("{name:?} is not a plain file name")),
    }

    if name.trim() != name {
        return Err("Name cannot start or end with whitespace".into());
    }
    Ok(())
}
