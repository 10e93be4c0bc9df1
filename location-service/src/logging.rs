//! Logging setup shared by the daemon and the one-shot CLI
//!
//! All output goes to stderr. `location-getposition` prints its fix on
//! stdout, which must stay a single JSON line.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output
    Standard,
    /// Verbose diagnostics with source locations
    Debug,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),
}

/// Initialize logging with the specified mode
///
/// # Environment Variables
///
/// - `LOCATION_LOG_LEVEL`: Override log level or filter directives
/// - `RUST_LOG`: Used when `LOCATION_LOG_LEVEL` is not set
///
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Standard => init_with_default("info"),
        LoggingMode::Debug => {
            let subscriber = Registry::default()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(create_env_filter("debug"));

            subscriber
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize with an explicit filter, e.g. from `--log-level`
pub fn init_with_level(level: &str) -> Result<(), LoggingError> {
    init_compact(EnvFilter::new(level))
}

/// Compact output, honouring the environment but defaulting to `default_level`
pub fn init_with_default(default_level: &str) -> Result<(), LoggingError> {
    init_compact(create_env_filter(default_level))
}

fn init_compact(filter: EnvFilter) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    Registry::default()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::TracingInit(e.to_string()))
}

// LOCATION_LOG_LEVEL, then RUST_LOG, then the mode default
fn create_env_filter(default_level: &str) -> EnvFilter {
    if let Ok(level) = std::env::var("LOCATION_LOG_LEVEL") {
        EnvFilter::new(level)
    } else if let Ok(rust_log) = std::env::var("RUST_LOG") {
        EnvFilter::new(rust_log)
    } else {
        EnvFilter::new(default_level)
    }
}
