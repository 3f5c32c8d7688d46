//! # Batch Reader Configuration
//!
//! Serde-backed configuration for the join reader and its logging. Every field has
//! a default so a partial TOML document (or none at all) still yields a usable
//! configuration; [`BatchConfig::validate`] rejects values the pipeline cannot run with.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_batch::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().with_file("config/batch.toml").load()?;
//! let batch_size = config.reader.batch_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT_BATCHES, DEFAULT_READ_BUFFER_SIZE,
    DEFAULT_READ_RETRY_LIMIT,
};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Root configuration document
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Sizing and retry settings applied to reader nodes
    pub reader: ReaderConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

impl BatchConfig {
    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.reader.validate()?;
        self.logging.validate()
    }
}

/// Sizing and retry settings for one reader node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Items per batch; the final batch of a source may be smaller
    pub batch_size: usize,

    /// Batches dispatched but not yet drained before the pump blocks
    pub max_concurrent_batches: usize,

    /// Output queue capacity
    pub read_buffer_size: usize,

    /// Additional reads issued after a failed source read
    pub read_retry_limit: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            read_retry_limit: DEFAULT_READ_RETRY_LIMIT,
        }
    }
}

impl ReaderConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let sizes = [
            ("reader.batch_size", self.batch_size),
            ("reader.max_concurrent_batches", self.max_concurrent_batches),
            ("reader.read_buffer_size", self.read_buffer_size),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value.to_string(),
                    "must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}

/// Output format for the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG` when set
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.level.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "logging.level",
                self.level.clone(),
                "must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reader_constants() {
        let config = BatchConfig::default();
        assert_eq!(config.reader.batch_size, 100);
        assert_eq!(config.reader.max_concurrent_batches, 20);
        assert_eq!(config.reader.read_buffer_size, 1000);
        assert_eq!(config.reader.read_retry_limit, 1);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = ReaderConfig {
            max_concurrent_batches: 0,
            ..ReaderConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reader.max_concurrent_batches"));
    }

    #[test]
    fn zero_retries_are_allowed() {
        let config = ReaderConfig {
            read_retry_limit: 0,
            ..ReaderConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let config: BatchConfig =
            serde_json::from_str(r#"{"reader": {"batch_size": 7}, "logging": {"format": "json"}}"#)
                .unwrap();
        assert_eq!(config.reader.batch_size, 7);
        assert_eq!(config.reader.read_buffer_size, 1000);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }
}
