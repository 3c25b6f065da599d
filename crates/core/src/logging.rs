//! Tracing subscriber initialisation.
//!
//! Host services call [`init_logging`] once at startup. `RUST_LOG` takes
//! precedence over the configured filter.

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config_filter(config)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    result.map_err(|_| LoggingError::AlreadyInitialized)
}

fn config_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(&config.filter).map_err(|e| LoggingError::InvalidFilter {
        directive: config.filter.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_filter_accepts_directives() {
        let config = LoggingConfig {
            filter: "info,bgcheck_core=debug".to_string(),
            format: LogFormat::Json,
        };
        assert!(config_filter(&config).is_ok());
    }

    #[test]
    fn test_config_filter_rejects_bad_level() {
        let config = LoggingConfig {
            filter: "bgcheck_core=loudest".to_string(),
            format: LogFormat::Pretty,
        };
        assert!(matches!(
            config_filter(&config),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(LoggingError::AlreadyInitialized)
        ));
    }
}
