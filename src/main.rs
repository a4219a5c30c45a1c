//! fileopsd - asynchronous file operation daemon.
//!
//! Usage:
//!   fileopsd serve                       Serve JSON-lines requests on stdin
//!   fileopsd copy PATH... --to DIR       Copy entries into a directory
//!   fileopsd move PATH... --to DIR       Move entries into a directory
//!   fileopsd delete PATH...              Delete entries
//!   fileopsd mkdir NAME DIR              Create a directory
//!   fileopsd rename OLD NEW              Rename an entry
//!   fileopsd chmod MODE PATH             Change permission bits (octal)

mod serve;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use fileops_core::{Operation, OperationKind, OperationOutcome, ServiceConfig, ServiceEvent};
use fileops_service::FileOperationsService;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fileopsd",
    version,
    about = "Asynchronous file operation service",
    long_about = "fileopsd runs copy, move, delete, mkdir, rename and chmod operations \
                  on a worker pool, optionally as another user.\n\n\
                  Use `fileopsd serve` for the JSON-lines interface, or a subcommand \
                  for a single operation."
)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (overrides RUST_LOG), e.g. "debug" or "fileops_service=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Number of workers (0 = twice the available parallelism)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Idle period before the service expires, in milliseconds
    #[arg(long, global = true)]
    linger_ms: Option<u64>,

    /// Run operations as this user
    #[arg(short = 'u', long, global = true)]
    run_as: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve JSON-lines requests on stdin and stream events on stdout
    Serve,

    /// Copy files and directories into a directory
    Copy {
        /// Entries to copy
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Destination directory
        #[arg(short = 't', long = "to")]
        destination: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Move files and directories into a directory
    Move {
        /// Entries to move
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Destination directory
        #[arg(short = 't', long = "to")]
        destination: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete files and directories
    Delete {
        /// Entries to delete
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Create a directory
    Mkdir {
        /// Name of the new directory
        name: PathBuf,

        /// Parent directory
        destination: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Rename an entry
    Rename {
        /// Current path
        old_path: PathBuf,

        /// New path
        new_path: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Change permission bits
    Chmod {
        /// Octal mode, e.g. 644 or 0o2755
        #[arg(value_parser = parse_mode)]
        mode: u32,

        /// Entry to change
        path: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    let config = load_config(&cli)?;

    let (operation, format) = match cli.command {
        Command::Serve => {
            serve::run(config).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Copy {
            paths,
            destination,
            format,
        } => (Operation::copy(paths, destination), format),
        Command::Move {
            paths,
            destination,
            format,
        } => (Operation::move_to(paths, destination), format),
        Command::Delete { paths, format } => (Operation::delete(paths), format),
        Command::Mkdir {
            name,
            destination,
            format,
        } => (Operation::mkdir(name, destination), format),
        Command::Rename {
            old_path,
            new_path,
            format,
        } => (Operation::rename(old_path, new_path), format),
        Command::Chmod { mode, path, format } => (Operation::set_permissions(path, mode), format),
    };

    let kind = operation.kind();
    let outcome = run_once(config, operation).await?;
    print_outcome(&outcome, kind, format)?;

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Install the stderr subscriber; stdout is reserved for results.
fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Read the optional config file and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ServiceConfig::default(),
    };

    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(linger_ms) = cli.linger_ms {
        config.linger_ms = linger_ms;
    }
    if let Some(user) = &cli.run_as {
        config.run_as = Some(user.clone());
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<ServiceConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Submit a single operation and wait for its outcome.
async fn run_once(config: ServiceConfig, operation: Operation) -> Result<OperationOutcome> {
    let service = FileOperationsService::new(config).context("Failed to start service")?;
    let mut events = service.subscribe();
    let handle = service
        .submit(operation, None)
        .context("Failed to submit operation")?;

    let mut outcome = OperationOutcome::new();
    loop {
        match events.recv().await {
            Some(ServiceEvent::Succeeded { handle: h, paths }) if h == handle => {
                outcome.succeeded = paths;
            }
            Some(ServiceEvent::Failed {
                handle: h,
                paths,
                error,
            }) if h == handle => {
                outcome.failed = paths;
                outcome.error = error;
            }
            Some(ServiceEvent::Finished { handle: h }) if h == handle => break,
            Some(ServiceEvent::Expired) => bail!("Service expired before the operation finished"),
            Some(_) => {}
            None => bail!("Service stopped before the operation finished"),
        }
    }

    service.shutdown().await;
    Ok(outcome)
}

fn print_outcome(
    outcome: &OperationOutcome,
    kind: OperationKind,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{}", outcome.summary(kind));
            for path in &outcome.failed {
                eprintln!("  failed: {}", path.display());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
    }
    Ok(())
}

/// Parse an octal permission mode.
fn parse_mode(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0o").unwrap_or(s);
    let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode {s:?}: {e}"))?;
    if mode > fileops_ops::MODE_MASK {
        return Err(format!("mode {s} exceeds {:o}", fileops_ops::MODE_MASK));
    }
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("644"), Ok(0o644));
        assert_eq!(parse_mode("0o2755"), Ok(0o2755));
        assert!(parse_mode("9").is_err());
        assert!(parse_mode("17777").is_err());
    }

    #[test]
    fn test_cli_parses_copy() {
        let cli = Cli::parse_from(["fileopsd", "copy", "a", "b", "--to", "dst", "-w", "2"]);
        assert_eq!(cli.workers, Some(2));
        match cli.command {
            Command::Copy {
                paths, destination, ..
            } => {
                assert_eq!(paths, vec![PathBuf::from("a"), PathBuf::from("b")]);
                assert_eq!(destination, PathBuf::from("dst"));
            }
            _ => panic!("expected copy"),
        }
    }

    #[test]
    fn test_config_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("fileops.toml");
        std::fs::write(&file, "workers = 3\nlinger_ms = 500\n").unwrap();

        let cli = Cli::parse_from([
            "fileopsd",
            "--config",
            file.to_str().unwrap(),
            "--linger-ms",
            "50",
            "serve",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.linger_ms, 50);
        assert_eq!(config.queue_capacity, 1024);
    }
}
