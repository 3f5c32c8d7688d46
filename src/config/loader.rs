//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate. Sources are
//! layered in increasing priority:
//!
//! 1. Serde defaults on [`BatchConfig`]
//! 2. The base TOML file, when one is given
//! 3. An environment override file next to it (`batch.toml` → `batch.test.toml`)
//! 4. Environment variables such as `TASKER_BATCH__READER__BATCH_SIZE=50`
//!
//! The merged document is validated before it is handed back.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::BatchConfig;
use crate::constants::{CONFIG_ENV_PREFIX, CONFIG_ENV_SEPARATOR, ENVIRONMENT_VARIABLES};

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    environment: Option<String>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            environment: None,
            env_prefix: CONFIG_ENV_PREFIX.to_string(),
        }
    }

    /// Load from the given base TOML file
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Use an explicit environment instead of detecting it
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Override the environment variable prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Detect the runtime environment from the usual variables
    pub fn detect_environment() -> String {
        ENVIRONMENT_VARIABLES
            .iter()
            .find_map(|name| std::env::var(name).ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn load(&self) -> ConfigResult<BatchConfig> {
        let environment = self
            .environment
            .clone()
            .unwrap_or_else(Self::detect_environment);

        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigurationError::file_read_error(
                    path.display().to_string(),
                    "file does not exist",
                ));
            }
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));

            let override_path = Self::override_path(path, &environment);
            debug!(
                environment = %environment,
                override_file = %override_path.display(),
                "Looking for environment override file"
            );
            builder = builder.add_source(
                File::from(override_path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator(CONFIG_ENV_SEPARATOR)
                .separator(CONFIG_ENV_SEPARATOR)
                .try_parsing(true),
        );

        let source_name = self
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());

        let config: BatchConfig = builder
            .build()
            .and_then(|merged| merged.try_deserialize())
            .map_err(|e| ConfigurationError::parse_error(source_name, e))?;

        config.validate()?;

        debug!(
            environment = %environment,
            batch_size = config.reader.batch_size,
            max_concurrent_batches = config.reader.max_concurrent_batches,
            read_buffer_size = config.reader.read_buffer_size,
            read_retry_limit = config.reader.read_retry_limit,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn override_path(base: &Path, environment: &str) -> PathBuf {
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = base
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "toml".to_string());
        base.with_file_name(format!("{stem}.{environment}.{extension}"))
    }
}
