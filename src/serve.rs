//! JSON-lines front end for `fileopsd serve`.
//!
//! Each stdin line is one request:
//!
//! ```text
//! {"op":"copy","paths":["/src/a.txt"],"destination":"/dst"}
//! {"op":"delete","paths":["/tmp/x"],"run_as":"alice"}
//! {"op":"chmod","path":"/tmp/x","mask":420}
//! {"op":"cancel","handle":3}
//! ```
//!
//! Accepted requests are answered with `{"handle":N}`, rejected ones with
//! `{"error":"..."}`. Notifications are written as they happen, one JSON
//! object per line.

use std::io::Write;
use std::path::PathBuf;

use color_eyre::eyre::{Context, Result};
use fileops_core::{Handle, Operation, RunAs, ServiceConfig, ServiceEvent};
use fileops_service::FileOperationsService;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Copy {
        paths: Vec<PathBuf>,
        destination: PathBuf,
        #[serde(default)]
        run_as: Option<String>,
    },
    Move {
        paths: Vec<PathBuf>,
        destination: PathBuf,
        #[serde(default)]
        run_as: Option<String>,
    },
    Delete {
        paths: Vec<PathBuf>,
        #[serde(default)]
        run_as: Option<String>,
    },
    Mkdir {
        name: PathBuf,
        destination: PathBuf,
        #[serde(default)]
        run_as: Option<String>,
    },
    Rename {
        old_path: PathBuf,
        new_path: PathBuf,
        #[serde(default)]
        run_as: Option<String>,
    },
    Chmod {
        path: PathBuf,
        mask: u32,
        #[serde(default)]
        run_as: Option<String>,
    },
    Cancel {
        handle: Handle,
    },
}

impl Request {
    /// The operation to submit, or `None` for a cancellation.
    fn into_submission(self) -> Option<(Operation, Option<RunAs>)> {
        let (operation, run_as) = match self {
            Self::Copy { paths, destination, run_as } => (Operation::copy(paths, destination), run_as),
            Self::Move { paths, destination, run_as } => {
                (Operation::move_to(paths, destination), run_as)
            }
            Self::Delete { paths, run_as } => (Operation::delete(paths), run_as),
            Self::Mkdir { name, destination, run_as } => (Operation::mkdir(name, destination), run_as),
            Self::Rename { old_path, new_path, run_as } => {
                (Operation::rename(old_path, new_path), run_as)
            }
            Self::Chmod { path, mask, run_as } => (Operation::set_permissions(path, mask), run_as),
            Self::Cancel { .. } => return None,
        };
        Some((operation, run_as.map(RunAs::user)))
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Reply {
    Accepted { handle: Handle },
    Rejected { error: String },
}

/// Write one JSON line to stdout.
fn emit<T: Serialize>(value: &T) {
    let line = match serde_json::to_string(value) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "failed to encode output line");
            return;
        }
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
        warn!(error = %e, "failed to write output line");
    }
}

fn handle_line(service: &FileOperationsService, line: &str) {
    let request = match serde_json::from_str::<Request>(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "malformed request");
            emit(&Reply::Rejected {
                error: format!("malformed request: {e}"),
            });
            return;
        }
    };

    if let Request::Cancel { handle } = request {
        service.cancel(handle);
        return;
    }

    let Some((operation, run_as)) = request.into_submission() else {
        return;
    };
    match service.submit(operation, run_as) {
        Ok(handle) => emit(&Reply::Accepted { handle }),
        Err(e) => emit(&Reply::Rejected {
            error: e.to_string(),
        }),
    }
}

/// Wait until every issued handle has been retired.
async fn wait_until_idle(service: &FileOperationsService) {
    let mut events = service.subscribe();
    while service.outstanding() > 0 {
        if events.recv().await.is_none() {
            break;
        }
    }
}

/// Serve requests from stdin until stdin closes or the service expires.
pub async fn run(config: ServiceConfig) -> Result<()> {
    let service = FileOperationsService::new(config).context("Failed to start service")?;
    let terminated = service.terminated();

    let mut events = service.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            emit(&event);
            if event == ServiceEvent::Expired {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = terminated.cancelled() => {
                info!("service expired");
                break;
            }
            line = lines.next_line() => {
                match line.context("Failed to read request")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => handle_line(&service, line.trim()),
                    None => {
                        debug!("stdin closed, waiting for outstanding work");
                        wait_until_idle(&service).await;
                        break;
                    }
                }
            }
        }
    }

    service.shutdown().await;
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer failed");
    }
    Ok(())
}
