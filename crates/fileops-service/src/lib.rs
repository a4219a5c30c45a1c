//! Asynchronous file operation service.
//!
//! [`FileOperationsService`] hands out a [`Handle`](fileops_core::Handle) for
//! every request, runs the work on a pool of tokio tasks (forking a
//! privilege-separated child when a request names another user) and reports
//! per-path results as [`ServiceEvent`](fileops_core::ServiceEvent)s. After a
//! configurable idle period with nothing outstanding the service expires on
//! its own.

mod error;
mod service;
mod state;
mod worker;

pub use error::{ServiceError, ServiceResult};
pub use service::FileOperationsService;
