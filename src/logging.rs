//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence when set; otherwise the configured level applies.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Logging setup failures.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured level is not a valid filter directive
    #[error("Invalid log filter '{directive}': {source}")]
    InvalidFilter {
        /// Rejected directive
        directive: String,
        /// Parser error
        source: tracing_subscriber::filter::ParseError,
    },
    /// A global subscriber is already installed
    #[error("Failed to install tracing subscriber: {0}")]
    AlreadyInitialized(String),
}

/// Install the global subscriber.
///
/// Calling this twice in one process returns [`LoggingError::AlreadyInitialized`].
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = filter(&config.level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

/// `RUST_LOG` if set and valid, else `level`.
pub fn filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return Ok(from_env);
    }
    EnvFilter::try_new(level).map_err(|source| LoggingError::InvalidFilter {
        directive: level.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_levels() {
        assert!(filter("debug").is_ok());
        assert!(filter("liquid_handler=trace,warn").is_ok());
    }

    #[test]
    fn test_filter_rejects_garbage() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(
                filter("liquid_handler=loudest"),
                Err(LoggingError::InvalidFilter { .. })
            ));
        }
    }
}
