//! # Item Sources
//!
//! The sequential producer contract consumed by reader nodes, an in-memory
//! implementation, and the transient-read retry policy applied to every source read.
//!
//! Sources are driven by exactly one pump at a time; implementations never see
//! concurrent calls.

use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::context::ExecutionContext;
use crate::error::{BatchError, BatchResult};
use crate::reader::metrics::ReaderMetrics;

/// Openable, closeable, sequential producer of items
#[async_trait]
pub trait ItemSource<T>: Send {
    /// Prepare the source for reading
    async fn open(&mut self, context: &ExecutionContext) -> BatchResult<()>;

    /// Next item, or `None` at end-of-stream
    async fn read(&mut self) -> BatchResult<Option<T>>;

    /// Release resources held by the source
    async fn close(&mut self) -> BatchResult<()>;
}

#[async_trait]
impl<T, S> ItemSource<T> for Box<S>
where
    S: ItemSource<T> + ?Sized,
{
    async fn open(&mut self, context: &ExecutionContext) -> BatchResult<()> {
        (**self).open(context).await
    }

    async fn read(&mut self) -> BatchResult<Option<T>> {
        (**self).read().await
    }

    async fn close(&mut self) -> BatchResult<()> {
        (**self).close().await
    }
}

/// In-memory source yielding the items of a collection in order
#[derive(Debug)]
pub struct IterSource<T> {
    pending: Option<Vec<T>>,
    queue: VecDeque<T>,
    opened: bool,
}

impl<T> IterSource<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            pending: Some(items.into_iter().collect()),
            queue: VecDeque::new(),
            opened: false,
        }
    }

    /// Items not yet read
    pub fn remaining(&self) -> usize {
        self.queue.len() + self.pending.as_ref().map_or(0, Vec::len)
    }
}

#[async_trait]
impl<T: Send> ItemSource<T> for IterSource<T> {
    async fn open(&mut self, _context: &ExecutionContext) -> BatchResult<()> {
        if let Some(items) = self.pending.take() {
            self.queue.extend(items);
        }
        self.opened = true;
        Ok(())
    }

    async fn read(&mut self) -> BatchResult<Option<T>> {
        if !self.opened {
            return Err(BatchError::InvalidState(
                "in-memory source read before open".to_string(),
            ));
        }
        Ok(self.queue.pop_front())
    }

    async fn close(&mut self) -> BatchResult<()> {
        self.opened = false;
        self.queue.clear();
        Ok(())
    }
}

/// Read one item, re-issuing the read up to `retry_limit` times on failure.
///
/// Each retry is a fresh `read` call on the same source; the source is never
/// reopened. The last failure is returned as a fatal `SourceRead` error.
pub async fn read_with_retry<T, S>(
    source: &mut S,
    retry_limit: u32,
    node: &str,
    metrics: &ReaderMetrics,
) -> BatchResult<Option<T>>
where
    S: ItemSource<T> + ?Sized,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match source.read().await {
            Ok(item) => {
                if item.is_some() {
                    metrics.record_item_read();
                }
                return Ok(item);
            }
            Err(err) if attempts <= retry_limit => {
                metrics.record_read_retry();
                warn!(
                    node = %node,
                    attempt = attempts,
                    retry_limit = retry_limit,
                    error = %err,
                    "Failed to read item from source, reading next record"
                );
            }
            Err(err) => {
                error!(
                    node = %node,
                    attempts = attempts,
                    error = %err,
                    "Source read failed after retries"
                );
                let message = match err {
                    BatchError::SourceRead { message, .. } => message,
                    other => other.to_string(),
                };
                return Err(BatchError::SourceRead { attempts, message });
            }
        }
    }
}
