//! Logging setup.

use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;
use crate::error::{Result, SchedulerError};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `config.log_level` is used.
///
/// # Errors
/// Returns `SchedulerError::Configuration` if the level does not parse or a
/// global subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| SchedulerError::Configuration(format!("invalid log level: {e}")))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| SchedulerError::Configuration(format!("tracing init failed: {e}")))
}
