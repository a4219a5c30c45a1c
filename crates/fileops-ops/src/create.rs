//! Directory creation.

use std::fs;
use std::path::Path;

use fileops_core::ErrorCode;
use tracing::warn;

use crate::rename::validate_filename;

/// Create directory `name` inside `parent`.
///
/// The result is reported against `name`. The parent must already exist and
/// the new directory must not.
pub fn create_directory<R>(name: &Path, parent: &Path, mut on_result: R) -> ErrorCode
where
    R: FnMut(&Path, bool),
{
    let valid = name
        .to_str()
        .map(validate_filename)
        .unwrap_or_else(|| Err("Name is not valid UTF-8".into()));
    if let Err(reason) = valid {
        warn!(name = %name.display(), %reason, "invalid directory name");
        on_result(name, false);
        return ErrorCode::FolderCreationFailed;
    }

    let path = parent.join(name);
    match fs::create_dir(&path) {
        Ok(()) => {
            on_result(name, true);
            ErrorCode::NoError
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to create directory");
            on_result(name, false);
            ErrorCode::FolderCreationFailed
        }
    }
}
