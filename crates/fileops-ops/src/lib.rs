//! File operations engine for fileops.
//!
//! This crate provides the synchronous algorithms behind every operation
//! (copy, move, delete, create directory, rename, change permissions). The
//! functions do no threading of their own: callers pass a cancellation token
//! that is checked between entries and a callback that receives the result
//! of every source path.

mod batch;
mod copy;
mod create;
mod delete;
mod move_op;
mod operation;
mod permissions;
mod rename;

pub use copy::{copy_files, copy_overwrite, copy_symlink, copy_tree};
pub use create::create_directory;
pub use delete::{delete_entry, delete_files};
pub use move_op::move_files;
pub use operation::{execute, run_operation};
pub use permissions::{set_permissions, MODE_MASK};
pub use rename::{rename_entry, validate_filename};

pub use tokio_util::sync::CancellationToken;
