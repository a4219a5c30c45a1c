//! Error types for the service.

use thiserror::Error;

/// Reasons a request could not be accepted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("request queue is full")]
    QueueFull,

    #[error("service is shutting down")]
    ShuttingDown,

    #[error("handle space exhausted")]
    HandlesExhausted,

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;
