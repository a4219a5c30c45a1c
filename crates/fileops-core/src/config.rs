//! Service configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for the file operations service.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct ServiceConfig {
    /// Number of worker tasks (0 = twice the available parallelism).
    #[builder(default = "0")]
    pub workers: usize,

    /// Maximum number of queued, not yet dispatched requests.
    #[builder(default = "1024")]
    pub queue_capacity: usize,

    /// Idle period after the last outstanding handle retires before the
    /// service expires, in milliseconds.
    #[builder(default = "120_000")]
    pub linger_ms: u64,

    /// Time given to in-flight work to unwind after expiry, in milliseconds.
    #[builder(default = "1_000")]
    pub shutdown_grace_ms: u64,

    /// Default identity for requests submitted without one.
    #[builder(default)]
    pub run_as: Option<String>,
}

impl ServiceConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == Some(0) {
            return Err("Queue capacity must be greater than zero".to_string());
        }
        if let Some(Some(user)) = &self.run_as {
            if user.trim().is_empty() {
                return Err("run_as user cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

impl ServiceConfig {
    /// Create a new service config builder.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// The effective number of workers.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
                    * 2
            }
            n => n,
        }
    }

    /// Idle linger period.
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    /// Grace period after expiry.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 1024,
            linger_ms: 120_000,
            shutdown_grace_ms: 1_000,
            run_as: None,
        }
    }
}
