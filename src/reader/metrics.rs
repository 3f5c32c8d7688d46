//! # Reader Metrics
//!
//! Lock-free counters for one reader node: items read from the source, retried
//! reads, batches dispatched and drained, items emitted, and the number of batches
//! in flight together with its high-water mark. The in-flight gauge is what makes
//! output-queue backpressure observable.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct ReaderMetrics {
    items_read: AtomicU64,
    read_retries: AtomicU64,
    batches_dispatched: AtomicU64,
    batches_completed: AtomicU64,
    items_emitted: AtomicU64,
    items_dropped: AtomicU64,
    in_flight_batches: AtomicUsize,
    max_in_flight_batches: AtomicUsize,
}

/// Point-in-time copy of [`ReaderMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub items_read: u64,
    pub read_retries: u64,
    pub batches_dispatched: u64,
    pub batches_completed: u64,
    pub items_emitted: u64,
    /// Items removed by filtering or inner-join reconciliation
    pub items_dropped: u64,
    pub in_flight_batches: usize,
    pub max_in_flight_batches: usize,
}

impl ReaderMetrics {
    pub fn record_item_read(&self) {
        self.items_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_retry(&self) {
        self.read_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch was handed to the pipeline
    pub fn record_batch_dispatched(&self) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        let current = self.in_flight_batches.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight_batches
            .fetch_max(current, Ordering::AcqRel);
    }

    /// A batch finished and its result was collected, successfully or not
    pub fn record_batch_completed(&self) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .in_flight_batches
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn record_items_emitted(&self, count: usize) {
        self.items_emitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_items_dropped(&self, count: usize) {
        self.items_dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn in_flight_batches(&self) -> usize {
        self.in_flight_batches.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_read: self.items_read.load(Ordering::Relaxed),
            read_retries: self.read_retries.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            items_emitted: self.items_emitted.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            in_flight_batches: self.in_flight_batches.load(Ordering::Acquire),
            max_in_flight_batches: self.max_in_flight_batches.load(Ordering::Acquire),
        }
    }
}
