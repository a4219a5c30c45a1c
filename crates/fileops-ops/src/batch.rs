//! Shared driver for operations over an ordered list of paths.

use std::path::{Path, PathBuf};

use fileops_core::ErrorCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `process` over `paths` in order.
///
/// The cancellation token is checked before each path. Processing stops at
/// the first failure or cancellation; every path that was not completed,
/// including the one that failed, is then reported as failed.
pub(crate) fn run_batch<P, R>(
    paths: &[PathBuf],
    cancel: &CancellationToken,
    mut on_result: R,
    mut process: P,
) -> ErrorCode
where
    P: FnMut(&Path) -> Result<(), ErrorCode>,
    R: FnMut(&Path, bool),
{
    let mut result = ErrorCode::NoError;
    let mut completed = 0;

    for path in paths {
        if cancel.is_cancelled() {
            debug!(path = %path.display(), "cancelled before processing");
            result = ErrorCode::OperationCancelled;
            break;
        }

        match process(path) {
            Ok(()) => {
                on_result(path, true);
                completed += 1;
            }
            Err(ErrorCode::OperationCancelled) => {
                debug!(path = %path.display(), "cancelled while processing");
                result = ErrorCode::OperationCancelled;
                break;
            }
            Err(code) => {
                warn!(path = %path.display(), error = %code, "path failed");
                result = code;
                break;
            }
        }
    }

    for path in &paths[completed..] {
        on_result(path, false);
    }

    result
}

/// The entry `source` would become inside `destination`.
pub(crate) fn target_in(source: &Path, destination: &Path) -> Option<PathBuf> {
    source.file_name().map(|name| destination.join(name))
}

/// Whether placing `source` at `target` would put it inside itself.
pub(crate) fn is_into_itself(source: &Path, target: &Path) -> bool {
    let (Ok(source), Ok(target)) = (std::path::absolute(source), std::path::absolute(target)) else {
        return false;
    };
    target.starts_with(&source)
}
