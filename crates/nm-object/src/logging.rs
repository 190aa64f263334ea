//! Logger setup.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{MirrorError, Result};

/// Builds the level filter: `RUST_LOG` when set, else the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            MirrorError::Config(format!("Invalid log level '{}': {}", config.level, e))
        }),
    }
}

/// Installs the global tracing subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };

    installed.map_err(|e| MirrorError::Config(format!("Failed to set logger: {}", e)))
}
