//! Subscriber setup for binaries.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the application. `RUST_LOG`, when set, takes precedence over the configured
//! level.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{MonitorError, MonitorResult};

/// Install the global subscriber described by `config`.
///
/// Fails if the level directive is malformed or a subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> MonitorResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            MonitorError::configuration(format!("invalid log level '{}': {}", config.level, e))
        })?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| MonitorError::configuration(format!("logging already initialized: {}", e)))
}
