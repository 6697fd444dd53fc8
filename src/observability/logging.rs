//! # Structured Logging
//!
//! Span macros for translation passes and subscriber installation on top of
//! `tracing-subscriber`.

use crate::config::LoggingConfig;
use crate::errors::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Create a tracing span for one translation step
#[macro_export]
macro_rules! translation_span {
    ($operation:expr, $listener:expr) => {
        tracing::info_span!(
            "translation",
            operation = %$operation,
            listener = %$listener
        )
    };
    ($operation:expr, $listener:expr, $($field:tt)*) => {
        tracing::info_span!(
            "translation",
            operation = %$operation,
            listener = %$listener,
            $($field)*
        )
    };
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `config.level`. Installing twice is an error, which
/// callers embedding the core in a larger process may ignore.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            Error::config_with_source(format!("Invalid log level '{}'", config.level), Box::new(e))
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json { builder.json().try_init() } else { builder.try_init() };

    installed.map_err(|e| Error::internal(format!("Failed to install log subscriber: {}", e)))
}
