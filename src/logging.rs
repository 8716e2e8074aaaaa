//! Process-wide structured logging (C21): JSON lines to a per-run
//! logfile, human-readable spans/events to stderr, mirroring the
//! project's `tracing_subscriber::fmt` bootstrap in `main`.

use std::fs::File;
use std::path::Path;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

use crate::errors::Error;

/// Initializes the global subscriber. Truncates `log_path` so each run
/// starts with a clean logfile, as required by the cache-layout
/// contract.
pub fn init(log_path: &Path, verbose: bool) -> Result<(), Error> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = File::create(log_path)?;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(log_file)
        .with_span_events(FmtSpan::CLOSE);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr);

    Registry::default()
        .with(filter)
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| Error::InvariantViolation(format!("logging already initialized: {e}")))?;

    Ok(())
}
