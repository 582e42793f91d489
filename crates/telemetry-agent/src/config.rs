//! Service configuration

use serde::Deserialize;
use telemetry_core::analytics::{DEFAULT_WINDOW_SIZE, DEFAULT_ZSCORE_THRESHOLD};
use telemetry_core::processor::{ProcessorConfig, ProcessorError, DEFAULT_BUFFER_SIZE};
use telemetry_core::signals;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ProcessorError),
}

/// Service configuration
///
/// Every field can be overridden through a `TELEMETRY_`-prefixed
/// environment variable, e.g. `TELEMETRY_WINDOW_SIZE=100`.
/// `TELEMETRY_SIGNALS` takes a comma-separated list.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Sliding window capacity per signal
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Absolute z-score above which a value is anomalous
    #[serde(default = "default_zscore_threshold")]
    pub zscore_threshold: f64,

    /// Sample queue capacity
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Anomaly event queue capacity
    #[serde(default = "default_buffer_size")]
    pub anomaly_buffer_size: usize,

    /// Signals tracked per sample
    #[serde(default = "default_signals")]
    pub signals: Vec<String>,

    /// Service name attached to structured logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_port() -> u16 {
    8080
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_zscore_threshold() -> f64 {
    DEFAULT_ZSCORE_THRESHOLD
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_signals() -> Vec<String> {
    vec![signals::CPU.to_string(), signals::RPS.to_string()]
}

fn default_service_name() -> String {
    "telemetry-agent".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            window_size: default_window_size(),
            zscore_threshold: default_zscore_threshold(),
            buffer_size: default_buffer_size(),
            anomaly_buffer_size: default_buffer_size(),
            signals: default_signals(),
            service_name: default_service_name(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self, ConfigError> {
        let source = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("TELEMETRY")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("signals"),
            )
            .build()?;

        Self::from_config(source)
    }

    /// Deserialize and validate an already assembled configuration
    pub fn from_config(source: config::Config) -> Result<Self, ConfigError> {
        let config: Self = source.try_deserialize()?;
        config.processor_config().validate()?;
        Ok(config)
    }

    /// Stream processor settings derived from this configuration
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            window_size: self.window_size,
            zscore_threshold: self.zscore_threshold,
            sample_buffer_size: self.buffer_size,
            anomaly_buffer_size: self.anomaly_buffer_size,
            signals: self.signals.clone(),
        }
    }
}
