//! Tracing setup
//!
//! The chat UI owns the terminal, so it logs to a daily file. Shell commands
//! log to stderr. `JARVIS_LOG` takes an `EnvFilter` directive.

use anyhow::{anyhow, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

fn filter() -> EnvFilter {
    EnvFilter::try_from_env("JARVIS_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to `<dir>/jarvis.log.<date>`. Keep the guard alive for the life of
/// the program or buffered lines are lost.
pub fn init_file(dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, "jarvis.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    Ok(guard)
}

pub fn init_stderr() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
