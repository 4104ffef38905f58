//! Configuration module for the Quartz converter
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) is a valid configuration.
//!
//! # Example
//! ```ignore
//! let config = Config::load("config.toml")?;
//! let converter = Converter::new(config.convert)?;
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::{DEFAULT_INPUT_BUFFER_SIZE, DEFAULT_OUTPUT_BUFFER_SIZE};
use crate::converter::RateEnvelope;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub convert: ConvertConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.convert.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Conversion
// =============================================================================

/// Settings for one conversion run
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Directory receiving the `CH{NN}.j` files
    pub output_dir: PathBuf,

    /// Record implausible gap timing as a diagnostic instead of failing
    pub tolerate_anomalies: bool,

    /// Input buffer capacity in bytes; bounds the largest message
    pub input_buffer_size: usize,

    /// Buffer capacity per output channel in bytes
    pub output_buffer_size: usize,

    /// Lowest plausible per-channel sampling rate during a gap (Hz)
    pub min_sample_rate_hz: f64,

    /// Highest plausible per-channel sampling rate during a gap (Hz)
    pub max_sample_rate_hz: f64,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        let envelope = RateEnvelope::default();
        Self {
            output_dir: PathBuf::from("."),
            tolerate_anomalies: false,
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            min_sample_rate_hz: envelope.min_hz,
            max_sample_rate_hz: envelope.max_hz,
        }
    }
}

impl ConvertConfig {
    /// Defaults writing into `output_dir`
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_tolerate_anomalies(mut self, tolerate: bool) -> Self {
        self.tolerate_anomalies = tolerate;
        self
    }

    pub fn with_buffer_sizes(mut self, input: usize, output: usize) -> Self {
        self.input_buffer_size = input;
        self.output_buffer_size = output;
        self
    }

    pub fn rate_envelope(&self) -> RateEnvelope {
        RateEnvelope {
            min_hz: self.min_sample_rate_hz,
            max_hz: self.max_sample_rate_hz,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_buffer_size == 0 || self.output_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "buffer sizes must be non-zero".to_string(),
            ));
        }
        let (min, max) = (self.min_sample_rate_hz, self.max_sample_rate_hz);
        if !(min.is_finite() && max.is_finite()) || min < 0.0 || min >= max {
            return Err(ConfigError::Invalid(format!(
                "sample rate envelope [{}, {}] Hz is empty",
                min, max
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for this crate's targets (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive for this crate
    pub fn directive(&self) -> String {
        format!("quartz_demux={}", self.level)
    }
}
