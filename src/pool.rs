//! # Keyed Item Pool
//!
//! Shared map-of-maps used to merge-join items across a reader tree. The outer map
//! is keyed by [`PartitionId`] (one join edge within one dispatched batch), the inner
//! map by the item key that edge's key function produced, and each entry is a bucket
//! of items sharing that key.
//!
//! Locking is per bucket: a bucket's member list is guarded by its own mutex and
//! each member item by another, so merges on unrelated keys never contend. There is
//! no pool-wide lock.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Item handle shared between a batch and the pool; the mutex is the per-member merge lock
pub type SharedItem<T> = Arc<Mutex<T>>;

type Bucket<T> = Arc<Mutex<Vec<SharedItem<T>>>>;
type Partition<T, K> = Arc<DashMap<K, Bucket<T>>>;

static NEXT_JOIN_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_BATCH_SCOPE: AtomicU64 = AtomicU64::new(1);

/// Stable token identifying one join edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JoinId(u64);

impl JoinId {
    pub fn next() -> Self {
        Self(NEXT_JOIN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JoinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "join-{}", self.0)
    }
}

/// Token identifying one dispatched batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchScope(u64);

impl BatchScope {
    pub fn next() -> Self {
        Self(NEXT_BATCH_SCOPE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Pool partition: one join edge within one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    pub join: JoinId,
    pub scope: BatchScope,
}

impl PartitionId {
    pub fn new(join: JoinId, scope: BatchScope) -> Self {
        Self { join, scope }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/scope-{}", self.join, self.scope.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Always append to the bucket
    InsertOnly,
    /// Merge into existing members; append only when the bucket is empty
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No key, nothing stored
    Skipped,
    Inserted,
    /// Number of existing members the item was merged into
    Merged(usize),
}

impl UpsertOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, UpsertOutcome::Merged(_))
    }
}

pub struct KeyedItemPool<T, K> {
    partitions: DashMap<PartitionId, Partition<T, K>>,
}

impl<T, K> fmt::Debug for KeyedItemPool<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedItemPool")
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

impl<T, K> Default for KeyedItemPool<T, K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }
}

impl<T, K> KeyedItemPool<T, K>
where
    T: Clone,
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge `item` into the bucket for `(partition, key)`.
    ///
    /// A missing key is a no-op. In merge mode the incoming value is snapshotted
    /// before any member lock is taken, so merging an item into a bucket that
    /// already holds it cannot self-deadlock.
    pub fn upsert<M>(
        &self,
        partition: PartitionId,
        key: Option<K>,
        item: &SharedItem<T>,
        merge: Option<&M>,
        mode: UpsertMode,
    ) -> UpsertOutcome
    where
        M: Fn(&mut T, &T) + ?Sized,
    {
        let Some(key) = key else {
            return UpsertOutcome::Skipped;
        };

        let inner = self.partitions.entry(partition).or_default().clone();
        let bucket = inner.entry(key).or_default().clone();
        drop(inner);

        let mut members = bucket.lock();
        let merge = match (mode, merge) {
            (UpsertMode::Merge, Some(merge)) if !members.is_empty() => merge,
            _ => {
                members.push(Arc::clone(item));
                return UpsertOutcome::Inserted;
            }
        };

        let incoming = item.lock().clone();
        let mut merged = 0;
        for member in members.iter() {
            if Arc::ptr_eq(member, item) {
                continue;
            }
            let mut existing = member.lock();
            merge(&mut *existing, &incoming);
            merged += 1;
        }
        trace!(partition = %partition, merged, "Merged item into pooled bucket");
        UpsertOutcome::Merged(merged)
    }

    /// Remove the buckets for every key produced by `items` from `partition`
    pub fn clear<F>(&self, partition: PartitionId, items: &[SharedItem<T>], key_fn: F)
    where
        F: Fn(&T) -> Option<K>,
    {
        let Some(inner) = self.partitions.get(&partition).map(|p| Arc::clone(p.value())) else {
            return;
        };
        for item in items {
            let key = {
                let value = item.lock();
                key_fn(&*value)
            };
            if let Some(key) = key {
                if let Some((_, bucket)) = inner.remove(&key) {
                    bucket.lock().clear();
                }
            }
        }
        self.partitions
            .remove_if(&partition, |_, remaining| remaining.is_empty());
    }

    /// Drop a partition and everything still pooled in it
    pub fn drop_partition(&self, partition: PartitionId) -> usize {
        self.partitions
            .remove(&partition)
            .map(|(_, inner)| {
                let buckets = inner.len();
                inner.clear();
                buckets
            })
            .unwrap_or(0)
    }

    pub fn clear_all(&self) {
        self.partitions.clear();
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn bucket_len(&self, partition: PartitionId, key: &K) -> usize {
        self.partitions
            .get(&partition)
            .and_then(|inner| inner.get(key).map(|bucket| Arc::clone(bucket.value())))
            .map(|bucket| bucket.lock().len())
            .unwrap_or(0)
    }

    /// Clones of the items currently pooled under `(partition, key)`
    pub fn members(&self, partition: PartitionId, key: &K) -> Vec<T> {
        let bucket = self
            .partitions
            .get(&partition)
            .and_then(|inner| inner.get(key).map(|b| Arc::clone(b.value())));
        let Some(bucket) = bucket else {
            return Vec::new();
        };
        let members = bucket.lock();
        members.iter().map(|m| m.lock().clone()).collect()
    }
}
