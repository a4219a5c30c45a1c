//! Privilege separation for fileops.
//!
//! A [`PrivilegedExecutor`] forks a child for every operation, lets the
//! child switch to the requested user and run the engine, and rebuilds the
//! per-path results from the line records the child writes to a pipe. Only
//! the short-lived child ever holds the alternate identity.

mod executor;
mod identity;
pub mod protocol;

pub use executor::{ExecutorError, PrivilegedExecutor};
pub use identity::{Credentials, TargetIdentity};
pub use protocol::{LineAssembler, ProtocolError, Record};
