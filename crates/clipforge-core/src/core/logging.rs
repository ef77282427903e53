//! Logging setup
//!
//! Installs the global `tracing` subscriber: human-readable output on stderr
//! (stdout is reserved for machine-readable CLI output) plus an optional
//! daily-rolling log file.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::core::CoreResult;

/// Log file name prefix inside the log directory
pub const LOG_FILE_NAME: &str = "clipforge.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Directive used when `RUST_LOG` is unset
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Initializes logging. Safe to call more than once; later calls keep the
/// first subscriber.
pub fn init_logging(log_dir: Option<&Path>, verbose: bool) -> CoreResult<()> {
    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    // Already initialized (tests, repeated calls) is not an error.
    let _ = tracing_subscriber::registry()
        .with(build_filter(verbose))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Ok(())
}
