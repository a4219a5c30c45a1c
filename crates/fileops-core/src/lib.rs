//! Core types for fileops.
//!
//! This crate provides the data structures shared by the operation engine,
//! the privilege-separation executor and the service: requests, handles,
//! outcomes, the error taxonomy and the service configuration.

mod config;
mod error;
mod outcome;
mod request;

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{EntryError, ErrorCode};
pub use outcome::{OperationOutcome, ServiceEvent};
pub use request::{Handle, Operation, OperationKind, OperationRequest, RunAs};
