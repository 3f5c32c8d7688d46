//! Error types for the batch reader system.
//!

use crate::config::ConfigurationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error("Failed to open item source for {node}: {message}")]
    SourceOpen { node: String, message: String },
    #[error("Failed to read item after {attempts} attempt(s): {message}")]
    SourceRead { attempts: u32, message: String },
    #[error("Failed to close item source for {node}: {message}")]
    SourceClose { node: String, message: String },
    #[error("Batch pipeline failure in {stage} stage: {message}")]
    Pipeline { stage: String, message: String },
    #[error("Child reader {node} failed: {message}")]
    ChildReader { node: String, message: String },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
    #[error("Queue closed: {0}")]
    QueueClosed(String),
}

impl BatchError {
    /// Build a transient read failure for a single read call.
    pub fn read<E: std::fmt::Display>(error: E) -> Self {
        BatchError::SourceRead {
            attempts: 1,
            message: error.to_string(),
        }
    }

    /// Build a pipeline failure tagged with the stage it came from.
    pub fn pipeline<S: Into<String>, E: std::fmt::Display>(stage: S, error: E) -> Self {
        BatchError::Pipeline {
            stage: stage.into(),
            message: error.to_string(),
        }
    }

    /// Source reads are the only failures the reader retries locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BatchError::SourceRead { .. })
    }
}

impl From<ConfigurationError> for BatchError {
    fn from(error: ConfigurationError) -> Self {
        BatchError::Configuration(error.to_string())
    }
}

impl From<tokio::task::JoinError> for BatchError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_panic() {
            let payload = error.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string());
            BatchError::Pipeline {
                stage: "task".to_string(),
                message,
            }
        } else {
            BatchError::WorkerPool(format!("task cancelled: {error}"))
        }
    }
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_source_reads_are_retryable() {
        assert!(BatchError::read("boom").is_retryable());
        assert!(!BatchError::pipeline("filter", "boom").is_retryable());
        assert!(!BatchError::InvalidState("closed".to_string()).is_retryable());
    }

    #[test]
    fn display_includes_stage_and_attempts() {
        let err = BatchError::SourceRead {
            attempts: 2,
            message: "disk gone".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read item after 2 attempt(s): disk gone"
        );
        assert_eq!(
            BatchError::pipeline("expand", "bad item").to_string(),
            "Batch pipeline failure in expand stage: bad item"
        );
    }

    #[tokio::test]
    async fn panicking_task_becomes_pipeline_error() {
        let handle = tokio::spawn(async {
            panic!("merge exploded");
        });
        let err: BatchError = handle.await.unwrap_err().into();
        assert_eq!(
            err,
            BatchError::Pipeline {
                stage: "task".to_string(),
                message: "merge exploded".to_string(),
            }
        );
    }
}
