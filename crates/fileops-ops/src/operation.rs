//! Dispatch of a whole [`Operation`] to the matching engine function.

use std::path::Path;

use fileops_core::{ErrorCode, Operation, OperationOutcome};
use tokio_util::sync::CancellationToken;

use crate::{
    copy_files, create_directory, delete_files, move_files, rename_entry, set_permissions,
};

/// Run `operation`, reporting each path result through `on_result`.
pub fn run_operation<R>(operation: &Operation, cancel: &CancellationToken, on_result: R) -> ErrorCode
where
    R: FnMut(&Path, bool),
{
    match operation {
        Operation::Copy { paths, destination } => {
            copy_files(paths, destination, cancel, on_result)
        }
        Operation::Move { paths, destination } => {
            move_files(paths, destination, cancel, on_result)
        }
        Operation::Delete { paths } => delete_files(paths, cancel, on_result),
        Operation::Mkdir { name, destination } => create_directory(name, destination, on_result),
        Operation::Rename { old_path, new_path } => rename_entry(old_path, new_path, on_result),
        Operation::SetPermissions { path, mask } => set_permissions(path, *mask, on_result),
    }
}

/// Run `operation` in process and collect its per-path results.
pub fn execute(operation: &Operation, cancel: &CancellationToken) -> OperationOutcome {
    let mut outcome = OperationOutcome::new();
    let error = run_operation(operation, cancel, |path: &Path, success| {
        outcome.record(path, success)
    });
    outcome.error = error;
    outcome
}
