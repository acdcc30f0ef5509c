//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the embedding application's call. These helpers cover the common
//! cases.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to initialize tracing: {0}")]
pub struct TelemetryError(String);

/// Output format for tracing logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text format.
    #[default]
    Text,
    /// Line-per-event JSON.
    Json,
}

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub log_level: tracing::Level,
    pub output_format: OutputFormat,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
        }
    }
}

impl SubscriberConfig {
    pub fn debug() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
            output_format: OutputFormat::Text,
        }
    }
}

/// Install a global subscriber for this crate's events. Calling it when a
/// subscriber is already set is not an error.
pub fn init_subscriber(config: SubscriberConfig) -> Result<(), TelemetryError> {
    let level_str = match config.log_level {
        tracing::Level::TRACE => "trace",
        tracing::Level::DEBUG => "debug",
        tracing::Level::INFO => "info",
        tracing::Level::WARN => "warn",
        tracing::Level::ERROR => "error",
    };
    let filter = format!("turnstream={level_str}");

    let init_result = match config.output_format {
        OutputFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };

    match init_result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("has already been set") => Ok(()),
        Err(e) => Err(TelemetryError(e.to_string())),
    }
}

/// Initialize from `TURNSTREAM_LOG_LEVEL` and `TURNSTREAM_LOG_FORMAT`.
pub fn init_from_env() -> Result<(), TelemetryError> {
    let mut config = SubscriberConfig::default();

    if let Ok(level) = std::env::var("TURNSTREAM_LOG_LEVEL") {
        config.log_level = match level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            other => {
                return Err(TelemetryError(format!(
                    "invalid log level: {other}. Valid options: trace, debug, info, warn, error"
                )));
            }
        };
    }

    if let Ok(format) = std::env::var("TURNSTREAM_LOG_FORMAT") {
        config.output_format = match format.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "text" => OutputFormat::Text,
            other => {
                return Err(TelemetryError(format!(
                    "invalid log format: {other}. Valid options: text, json"
                )));
            }
        };
    }

    init_subscriber(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        assert!(init_subscriber(SubscriberConfig::default()).is_ok());
        assert!(init_subscriber(SubscriberConfig::debug()).is_ok());
    }
}
