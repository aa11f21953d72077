//! Logging subscriber setup.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable consulted for the log filter before the configured level.
pub const LOG_LEVEL_ENV: &str = "PACT_LOG_LEVEL";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive when `PACT_LOG_LEVEL` is unset
    pub log_level: String,
    /// Whether to output JSON lines
    pub json_output: bool,
    /// Whether to print the event target
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            json_output: false,
            with_target: false,
        }
    }
}

impl LogConfig {
    /// Set the default log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable JSON output.
    #[must_use]
    pub const fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    /// Include event targets in the output.
    #[must_use]
    pub const fn with_target(mut self) -> Self {
        self.with_target = true;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }
}

/// Install the global subscriber.
///
/// Logs go to stderr so console reports on stdout stay readable.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(config.filter());

    if config.json_output {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.with_target)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(config.with_target)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.log_level, "warn");
        assert!(!config.json_output);
        assert!(!config.with_target);
    }

    #[test]
    fn test_config_builder() {
        let config = LogConfig::default()
            .with_log_level("debug")
            .with_json_output()
            .with_target();

        assert_eq!(config.log_level, "debug");
        assert!(config.json_output);
        assert!(config.with_target);
    }

    #[test]
    fn test_second_init_reports_error() {
        let config = LogConfig::default();
        let first = init_logging(&config);
        let second = init_logging(&config);
        // another test may have installed a subscriber first
        assert!(first.is_err() || second.is_err());
    }
}
