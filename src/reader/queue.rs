//! # Output Queue
//!
//! Bounded producer/consumer queue between a root node's pump and its consumer.
//! End-of-stream is an explicit poison marker; a fatal failure is recorded once in
//! a single-assignment slot and re-raised exactly once on the consumer side, ahead
//! of any items still buffered.

use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;

use crate::error::{BatchError, BatchResult};

#[derive(Debug)]
pub enum QueueMessage<T> {
    Item(T),
    Poison,
}

/// Create a queue holding at most `capacity` undelivered messages
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, OutputQueue<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let failure = Arc::new(OnceLock::new());
    (
        QueueSender {
            tx,
            failure: Arc::clone(&failure),
        },
        OutputQueue {
            rx,
            failure,
            failure_reported: false,
            finished: false,
        },
    )
}

#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<QueueMessage<T>>,
    failure: Arc<OnceLock<BatchError>>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            failure: Arc::clone(&self.failure),
        }
    }
}

impl<T> QueueSender<T> {
    /// Push one item, waiting while the queue is full
    pub async fn send(&self, item: T) -> BatchResult<()> {
        self.tx
            .send(QueueMessage::Item(item))
            .await
            .map_err(|_| BatchError::QueueClosed("output queue receiver dropped".to_string()))
    }

    /// Push a batch of items in order
    pub async fn send_all(&self, items: impl IntoIterator<Item = T>) -> BatchResult<usize> {
        let mut sent = 0;
        for item in items {
            self.send(item).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Record the fatal failure; only the first one is kept
    pub fn fail(&self, error: BatchError) -> bool {
        self.failure.set(error).is_ok()
    }

    pub fn failure(&self) -> Option<BatchError> {
        self.failure.get().cloned()
    }

    /// Push the poison marker; a consumer that already went away is not an error
    pub async fn finish(&self) {
        let _ = self.tx.send(QueueMessage::Poison).await;
    }
}

#[derive(Debug)]
pub struct OutputQueue<T> {
    rx: mpsc::Receiver<QueueMessage<T>>,
    failure: Arc<OnceLock<BatchError>>,
    failure_reported: bool,
    finished: bool,
}

impl<T> OutputQueue<T> {
    /// Wait for the next item. `Ok(None)` is end-of-stream; a recorded failure is
    /// returned once, after which the queue reports end-of-stream.
    pub async fn next(&mut self) -> BatchResult<Option<T>> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(QueueMessage::Item(item)) => Ok(Some(item)),
            Some(QueueMessage::Poison) | None => {
                self.finished = true;
                match self.take_failure() {
                    Some(err) => Err(err),
                    None => Ok(None),
                }
            }
        }
    }

    fn take_failure(&mut self) -> Option<BatchError> {
        if self.failure_reported {
            return None;
        }
        let err = self.failure.get().cloned()?;
        self.failure_reported = true;
        self.finished = true;
        Some(err)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Close the queue and discard anything still buffered
    pub fn drain(&mut self) -> usize {
        self.rx.close();
        self.finished = true;
        let mut discarded = 0;
        while let Ok(message) = self.rx.try_recv() {
            if matches!(message, QueueMessage::Item(_)) {
                discarded += 1;
            }
        }
        discarded
    }
}
