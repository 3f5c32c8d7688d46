//! # Structured Logging Module
//!
//! Console logging through the tracing ecosystem, with a pretty or JSON formatter
//! chosen by [`LoggingConfig`]. `RUST_LOG` takes precedence over the configured level.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
        };

        let layer = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter())
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter())
                .boxed(),
        };

        // A global subscriber may already be installed by the host application
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            level = %config.level,
            format = ?config.format,
            "STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log structured data for a batch lifecycle event
pub fn log_batch_operation(
    operation: &str,
    node: &str,
    batch_index: u64,
    item_count: usize,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        node = %node,
        batch = batch_index,
        items = item_count,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "BATCH_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialization_is_idempotent() {
        let config = LoggingConfig::default();
        init_structured_logging(&config);
        init_structured_logging(&LoggingConfig {
            format: LogFormat::Json,
            ..config
        });
        assert!(LOGGER_INITIALIZED.get().is_some());
    }
}
