//! Configuration module for otel-greeter
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. Every section is optional;
//! a missing file section falls back to the defaults below.
//!
//! Service name and version are not configurable, see
//! [`crate::SERVICE_NAME`] and [`crate::SERVICE_VERSION`].

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::{expand_env_vars, ConfigLoader};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid server address '{}': expected host:port",
                self.server.address
            )));
        }

        if self.server.drain_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "server.drain_timeout_seconds must be greater than 0".into(),
            ));
        }

        if self.telemetry.shutdown_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "telemetry.shutdown_timeout_seconds must be greater than 0".into(),
            ));
        }

        if self.telemetry.log_filter.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "telemetry.log_filter cannot be empty".into(),
            ));
        }

        let batch = &self.telemetry.batch;
        if batch.max_queue_size == 0 || batch.max_export_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "Batch queue and export sizes must be greater than 0".into(),
            ));
        }
        if batch.max_export_batch_size > batch.max_queue_size {
            return Err(ConfigError::ValidationError(format!(
                "Invalid batch config: max_export_batch_size ({}) exceeds max_queue_size ({})",
                batch.max_export_batch_size, batch.max_queue_size
            )));
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address. Default: "0.0.0.0:3002"
    #[serde(default = "default_address")]
    pub address: String,

    /// How long in-flight requests may run once draining starts. Default: 10
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

impl ServerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            drain_timeout_seconds: default_drain_timeout(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:3002".to_string()
}

fn default_drain_timeout() -> u64 {
    10
}

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Telemetry pipeline configuration.
///
/// # Example
///
/// ```yaml
/// telemetry:
///   shutdown_timeout_seconds: 5
///   log_filter: "info,hyper=warn"
///   log_format: "json"
///   batch:
///     scheduled_delay_millis: 1000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Upper bound for flushing and shutting down both providers. Default: 5
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    /// EnvFilter directive used when RUST_LOG is unset. Default: "info"
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Console log format. Default: text
    #[serde(default)]
    pub log_format: LogFormat,

    /// Batch processor configuration, shared by spans and logs
    #[serde(default)]
    pub batch: BatchConfig,
}

impl TelemetryConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_seconds: default_shutdown_timeout(),
            log_filter: default_log_filter(),
            log_format: LogFormat::default(),
            batch: BatchConfig::default(),
        }
    }
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Console output format for diagnostics written to stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Batch processor configuration.
///
/// Controls how spans and log records are batched before they reach the
/// exporter. The processor exports when either the queue fills up to
/// `max_export_batch_size` or `scheduled_delay_millis` elapses.
///
/// # Example
///
/// ```yaml
/// batch:
///   max_queue_size: 2048
///   scheduled_delay_millis: 5000  # Export every 5 seconds
///   max_export_batch_size: 512
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of items to queue before dropping. Default: 2048
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Delay in milliseconds between scheduled exports. Default: 5000 (5 seconds)
    #[serde(default = "default_scheduled_delay")]
    pub scheduled_delay_millis: u64,

    /// Maximum number of items per export batch. Default: 512
    #[serde(default = "default_max_export_batch_size")]
    pub max_export_batch_size: usize,
}

impl BatchConfig {
    pub fn scheduled_delay(&self) -> Duration {
        Duration::from_millis(self.scheduled_delay_millis)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            scheduled_delay_millis: default_scheduled_delay(),
            max_export_batch_size: default_max_export_batch_size(),
        }
    }
}

fn default_max_queue_size() -> usize {
    2048
}

fn default_scheduled_delay() -> u64 {
    5000
}

fn default_max_export_batch_size() -> usize {
    512
}
