//! Structured logging initialization for meshwork processes.
//!
//! Tier log entries are emitted through `tracing`; these helpers install a
//! subscriber so they reach stdout. The filter defaults to `info` and can
//! be overridden with the `RUST_LOG` environment variable.

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging setup errors
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Global subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a human-readable subscriber.
///
/// # Example
/// ```no_run
/// use meshwork_runtime::logging;
///
/// logging::init().expect("logging");
/// tracing::info!(edge = "local", "edge started");
/// ```
pub fn init() -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init()?;
    Ok(())
}

/// Install a JSON subscriber for log aggregation.
pub fn init_json() -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .try_init()?;
    Ok(())
}

/// Install a test-writer subscriber, ignoring repeated installs.
pub fn try_init_test() {
    let _ = tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().with_test_writer())
        .try_init();
}
