//! Log subscriber setup
//!
//! Progress and diff lines are emitted through `tracing`; embedders that already
//! install a subscriber can skip this module entirely.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install a global subscriber honouring `RUST_LOG`
///
/// Without `RUST_LOG` the level is `info`, or `debug` when `verbose`. Returns
/// `false` if a subscriber was already installed.
pub fn init_logging(verbose: bool) -> bool {
    init_logging_with(verbose, LogFormat::Text)
}

pub fn init_logging_with(verbose: bool, format: LogFormat) -> bool {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_target(false)).try_init(),
    };
    result.is_ok()
}
