//! Configuration management for the ingest service.
//!
//! This module handles loading and validating configuration from an optional
//! configuration file and environment variables. Every field has a default, so
//! the service runs with no configuration at all.

use config::{Config, ConfigError, Environment, File};
use framevault_pipeline::KafkaConfig;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the ingest service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestConfig {
    /// Kafka transport configuration
    #[serde(default)]
    pub transport: KafkaConfig,

    /// Image source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Image source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Record key for every published frame. One key per producer keeps the
    /// producer's frames on one partition.
    #[serde(default = "default_stream_key")]
    pub stream_key: String,

    /// Pause after a pass that published nothing, in milliseconds
    #[serde(default = "default_idle_rescan_ms")]
    pub idle_rescan_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_stream_key() -> String {
    "framevault-ingest".to_string()
}
fn default_idle_rescan_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            stream_key: default_stream_key(),
            idle_rescan_ms: default_idle_rescan_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl SourceConfig {
    /// Get the idle rescan delay as Duration.
    pub fn idle_rescan(&self) -> Duration {
        Duration::from_millis(self.idle_rescan_ms)
    }
}

impl IngestConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Config file (config/ingest.{toml,yml,json}), optional
    /// 2. Environment variables (e.g. INGEST__SOURCE__STREAM_KEY)
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/ingest").required(false))
            .add_source(
                Environment::with_prefix("INGEST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.source.stream_key.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "source.stream_key".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(ConfigValidationError::InvalidValue {
                field: "logging.format".to_string(),
                message: "format must be json or pretty".to_string(),
            });
        }

        self.transport
            .validate()
            .map_err(|e| ConfigValidationError::InvalidValue {
                field: "transport".to_string(),
                message: e.to_string(),
            })
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
