//! # Batch Pipeline
//!
//! One dispatched batch runs through:
//!
//! 1. filter, then expand (order preserved within the batch)
//! 2. insert into the pool partition of every child join, scoped to this batch
//! 3. build one child node per join and run them all concurrently on the worker
//!    pool, waiting for every child to finish
//! 4. clear this batch's partitions, then drop parent items an inner join never matched
//! 5. for a child node, merge the surviving items into the parent's partition
//!
//! Step 5 runs after the node's own subtree so that grandchild data already merged
//! into a child item is carried up to the parent in the same merge.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::context::ExecutionContext;
use crate::error::{BatchError, BatchResult};
use crate::join::{JoinEdge, JoinSpec, KeyFn};
use crate::logging::log_batch_operation;
use crate::pool::{BatchScope, KeyedItemPool, PartitionId, SharedItem, UpsertMode};
use crate::reader::metrics::ReaderMetrics;
use crate::reader::worker::WorkerPool;
use crate::reader::NodeReport;

/// Predicate deciding whether an item enters the batch
pub type FilterFn<T> = Arc<dyn Fn(&T, &ExecutionContext) -> bool + Send + Sync>;

/// Expands one item into zero or more items
pub type MapperFn<T> = Arc<dyn Fn(T, &ExecutionContext) -> Vec<T> + Send + Sync>;

/// Pool and executor shared by every node of one tree, owned by its root
pub struct TreeResources<T, K> {
    pub pool: Arc<KeyedItemPool<T, K>>,
    pub workers: WorkerPool,
}

impl<T, K> Clone for TreeResources<T, K> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            workers: self.workers.clone(),
        }
    }
}

impl<T, K> fmt::Debug for TreeResources<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeResources")
            .field("pool", &self.pool)
            .field("workers", &self.workers)
            .finish()
    }
}

pub(crate) struct BatchPipeline<T, K> {
    pub(crate) node: String,
    pub(crate) is_root: bool,
    pub(crate) filter: Option<FilterFn<T>>,
    pub(crate) mapper: Option<MapperFn<T>>,
    pub(crate) joins: Vec<JoinSpec<T, K>>,
    pub(crate) edge: Option<JoinEdge<T, K>>,
    pub(crate) resources: TreeResources<T, K>,
    pub(crate) context: ExecutionContext,
    pub(crate) metrics: Arc<ReaderMetrics>,
}

fn key_of<T, K>(key_fn: &KeyFn<T, K>, item: &SharedItem<T>) -> Option<K> {
    let value = item.lock();
    key_fn(&*value)
}

impl<T, K> BatchPipeline<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
{
    pub(crate) async fn process(self: Arc<Self>, batch_index: u64, batch: Vec<T>) -> BatchResult<Vec<T>> {
        let received = batch.len();
        if self.is_root {
            log_batch_operation("process_batch", &self.node, batch_index, received, "started");
        } else {
            debug!(node = %self.node, batch = batch_index, items = received, "Processing child batch");
        }

        let mut items: Vec<SharedItem<T>> = self
            .transform(batch)
            .into_iter()
            .map(|item| Arc::new(Mutex::new(item)))
            .collect();

        if !self.joins.is_empty() && !items.is_empty() {
            let edges = self.insert_into_partitions(&items);
            let snapshot: Vec<T> = items.iter().map(|item| item.lock().clone()).collect();

            let fan_out = self.fan_out(batch_index, &edges, &snapshot).await;

            let pool = &self.resources.pool;
            for (spec, edge) in &edges {
                let key_fn = Arc::clone(spec.key_fn());
                pool.clear(edge.partition, &items, move |value: &T| key_fn(value));
                pool.drop_partition(edge.partition);
            }
            fan_out?;

            self.reconcile(&mut items, &edges);
        }

        if let Some(edge) = &self.edge {
            self.merge_into_parent(edge, &items);
        }

        let surviving = items.len();
        self.metrics
            .record_items_dropped(received.saturating_sub(surviving));

        let output: Vec<T> = items
            .into_iter()
            .map(|item| match Arc::try_unwrap(item) {
                Ok(owned) => owned.into_inner(),
                Err(shared) => shared.lock().clone(),
            })
            .collect();

        if self.is_root {
            log_batch_operation("process_batch", &self.node, batch_index, surviving, "completed");
        } else {
            debug!(node = %self.node, batch = batch_index, items = surviving, "Processed child batch");
        }
        Ok(output)
    }

    fn transform(&self, batch: Vec<T>) -> Vec<T> {
        let context = &self.context;
        let kept = batch
            .into_iter()
            .filter(|item| self.filter.as_ref().map_or(true, |f| f(item, context)));
        match &self.mapper {
            Some(mapper) => kept.flat_map(|item| mapper(item, context)).collect(),
            None => kept.collect(),
        }
    }

    fn insert_into_partitions(&self, items: &[SharedItem<T>]) -> Vec<(JoinSpec<T, K>, JoinEdge<T, K>)> {
        let scope = BatchScope::next();
        self.joins
            .iter()
            .map(|spec| {
                let partition = PartitionId::new(spec.id(), scope);
                for item in items {
                    self.resources.pool.upsert(
                        partition,
                        key_of(spec.key_fn(), item),
                        item,
                        Some(&**spec.merge_fn()),
                        UpsertMode::InsertOnly,
                    );
                }
                (spec.clone(), JoinEdge::new(spec, partition))
            })
            .collect()
    }

    /// Run one child per join to completion; every child is awaited even when a
    /// sibling fails, so nothing is still writing to the partitions afterwards
    async fn fan_out(
        &self,
        batch_index: u64,
        edges: &[(JoinSpec<T, K>, JoinEdge<T, K>)],
        snapshot: &[T],
    ) -> BatchResult<()> {
        let mut children = Vec::with_capacity(edges.len());
        for (spec, edge) in edges {
            let child = spec.provide(snapshot).map_err(|e| BatchError::ChildReader {
                node: spec.name(),
                message: format!("provider failed: {e}"),
            })?;
            children.push((spec.name(), child.named_default(spec.name()), edge.clone()));
        }

        let mut handles = Vec::with_capacity(children.len());
        for (name, child, edge) in children {
            let run = child.run_as_child(edge, self.resources.clone(), self.context.clone());
            handles.push((name, self.resources.workers.spawn(run)?));
        }

        let mut failure = None;
        for (name, handle) in handles {
            let outcome: BatchResult<NodeReport> = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(join_error.into()),
            };
            match outcome {
                Ok(report) => debug!(
                    node = %self.node,
                    child = %report.name,
                    batch = batch_index,
                    items_read = report.metrics.items_read,
                    "Child reader completed"
                ),
                Err(err) => {
                    error!(
                        node = %self.node,
                        child = %name,
                        batch = batch_index,
                        error = %err,
                        "Child reader failed"
                    );
                    failure.get_or_insert(BatchError::ChildReader {
                        node: name,
                        message: err.to_string(),
                    });
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    fn reconcile(&self, items: &mut Vec<SharedItem<T>>, edges: &[(JoinSpec<T, K>, JoinEdge<T, K>)]) {
        let inner: Vec<_> = edges
            .iter()
            .filter(|(spec, _)| spec.is_inner_join())
            .collect();
        if inner.is_empty() {
            return;
        }
        items.retain(|item| {
            inner.iter().all(|(spec, edge)| {
                key_of(spec.key_fn(), item).is_some_and(|key| edge.was_matched(&key))
            })
        });
    }

    fn merge_into_parent(&self, edge: &JoinEdge<T, K>, items: &[SharedItem<T>]) {
        for item in items {
            let key = key_of(&edge.key_fn, item);
            let outcome = self.resources.pool.upsert(
                edge.partition,
                key.clone(),
                item,
                Some(&*edge.merge_fn),
                UpsertMode::Merge,
            );
            if outcome.is_merged() {
                if let Some(key) = key {
                    edge.record_match(key);
                }
            }
        }
    }
}
