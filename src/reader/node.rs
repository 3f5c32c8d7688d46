//! # Reader Node
//!
//! A node of a reader tree. The node the consumer opens is the root: it owns the
//! tree's keyed item pool and worker pool, reads its source on a background pump,
//! and hands joined items out through a bounded output queue. Nodes built by a
//! [`JoinSpec`] provider run as children inside one parent batch and merge their
//! items into the parent's pool partition instead of emitting them.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ReaderConfig;
use crate::constants::DEFAULT_NODE_NAME;
use crate::context::ExecutionContext;
use crate::error::{BatchError, BatchResult};
use crate::join::{JoinEdge, JoinSpec};
use crate::pool::KeyedItemPool;
use crate::reader::metrics::{MetricsSnapshot, ReaderMetrics};
use crate::reader::pipeline::{BatchPipeline, FilterFn, MapperFn, TreeResources};
use crate::reader::queue::{self, OutputQueue, QueueSender};
use crate::reader::state::NodeState;
use crate::reader::worker::WorkerPool;
use crate::source::{read_with_retry, ItemSource};

type InFlightBatch<T> = (u64, JoinHandle<BatchResult<Vec<T>>>);

/// Summary of one node's completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: Uuid,
    pub name: String,
    pub state: NodeState,
    /// Distinct keys this child merged into parent items (inner joins only)
    pub matched_keys: usize,
    pub metrics: MetricsSnapshot,
}

struct RootRuntime<T> {
    queue: OutputQueue<T>,
    pump: JoinHandle<()>,
    workers: WorkerPool,
}

pub struct ReaderNode<T, K> {
    id: Uuid,
    name: String,
    config: ReaderConfig,
    source: Option<Box<dyn ItemSource<T>>>,
    filter: Option<FilterFn<T>>,
    mapper: Option<MapperFn<T>>,
    joins: Vec<JoinSpec<T, K>>,
    state: NodeState,
    metrics: Arc<ReaderMetrics>,
    pool: Option<Arc<KeyedItemPool<T, K>>>,
    runtime: Option<RootRuntime<T>>,
}

impl<T, K> fmt::Debug for ReaderNode<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("config", &self.config)
            .field("joins", &self.joins)
            .finish_non_exhaustive()
    }
}

impl<T, K> Drop for ReaderNode<T, K> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.pump.abort();
            runtime.workers.shutdown();
        }
    }
}

pub struct ReaderNodeBuilder<T, K> {
    name: Option<String>,
    config: ReaderConfig,
    source: Box<dyn ItemSource<T>>,
    filter: Option<FilterFn<T>>,
    mapper: Option<MapperFn<T>>,
    joins: Vec<JoinSpec<T, K>>,
}

impl<T, K> ReaderNodeBuilder<T, K> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn max_concurrent_batches(mut self, max_concurrent_batches: usize) -> Self {
        self.config.max_concurrent_batches = max_concurrent_batches;
        self
    }

    pub fn read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.config.read_buffer_size = read_buffer_size;
        self
    }

    pub fn read_retry_limit(mut self, read_retry_limit: u32) -> Self {
        self.config.read_retry_limit = read_retry_limit;
        self
    }

    /// Keep only items for which `filter` returns true
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&T, &ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Replace each item with the items `mapper` expands it into
    pub fn mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(T, &ExecutionContext) -> Vec<T> + Send + Sync + 'static,
    {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    pub fn join(mut self, join: JoinSpec<T, K>) -> Self {
        self.joins.push(join);
        self
    }

    pub fn build(self) -> BatchResult<ReaderNode<T, K>> {
        self.config.validate()?;
        Ok(ReaderNode {
            id: Uuid::new_v4(),
            name: self.name.unwrap_or_else(|| DEFAULT_NODE_NAME.to_string()),
            config: self.config,
            source: Some(self.source),
            filter: self.filter,
            mapper: self.mapper,
            joins: self.joins,
            state: NodeState::New,
            metrics: Arc::new(ReaderMetrics::default()),
            pool: None,
            runtime: None,
        })
    }
}

impl<T, K> ReaderNode<T, K> {
    pub fn builder<S>(source: S) -> ReaderNodeBuilder<T, K>
    where
        S: ItemSource<T> + 'static,
    {
        ReaderNodeBuilder {
            name: None,
            config: ReaderConfig::default(),
            source: Box::new(source),
            filter: None,
            mapper: None,
            joins: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn joins(&self) -> &[JoinSpec<T, K>] {
        &self.joins
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn named_default(mut self, name: String) -> Self {
        if self.name == DEFAULT_NODE_NAME {
            self.name = name;
        }
        self
    }

    fn transition(&mut self, next: NodeState) -> BatchResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(BatchError::InvalidState(format!(
                "reader {} cannot move from {} to {}",
                self.name, self.state, next
            )));
        }
        debug!(node = %self.name, from = %self.state, to = %next, "Reader state transition");
        self.state = next;
        Ok(())
    }

    fn take_source(&mut self) -> BatchResult<Box<dyn ItemSource<T>>> {
        self.source.take().ok_or_else(|| {
            BatchError::InvalidState(format!("reader {} has no source to open", self.name))
        })
    }

    fn report(&self, matched_keys: usize) -> NodeReport {
        NodeReport {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            matched_keys,
            metrics: self.metrics.snapshot(),
        }
    }

    fn pipeline(
        &self,
        edge: Option<JoinEdge<T, K>>,
        resources: TreeResources<T, K>,
        context: ExecutionContext,
    ) -> BatchPipeline<T, K> {
        BatchPipeline {
            node: self.name.clone(),
            is_root: edge.is_none(),
            filter: self.filter.clone(),
            mapper: self.mapper.clone(),
            joins: self.joins.clone(),
            edge,
            resources,
            context,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<T, K> ReaderNode<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
{
    /// Partitions currently held in this root's item pool
    pub fn pooled_partitions(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.partition_count())
    }

    /// Open this node as the root of a tree: open the source, create the tree's
    /// pool and worker pool, and start the background pump.
    ///
    /// Must be called from within a multi-thread tokio runtime.
    pub async fn open(&mut self, context: &ExecutionContext) -> BatchResult<()> {
        self.transition(NodeState::Opened)?;
        let workers = match WorkerPool::from_current(self.name.clone()) {
            Ok(workers) => workers,
            Err(err) => {
                self.state = NodeState::Error;
                return Err(err);
            }
        };
        let mut source = self.take_source()?;
        if let Err(err) = source.open(context).await {
            self.state = NodeState::Error;
            error!(node = %self.name, error = %err, "Failed to open reader source");
            return Err(BatchError::SourceOpen {
                node: self.name.clone(),
                message: err.to_string(),
            });
        }

        let pool = Arc::new(KeyedItemPool::new());
        let resources = TreeResources {
            pool: Arc::clone(&pool),
            workers: workers.clone(),
        };
        let pipeline = Arc::new(self.pipeline(None, resources, context.clone()));
        let (sender, output) = queue::bounded(self.config.read_buffer_size);

        let pump = RootPump {
            config: self.config,
            source,
            pipeline,
            sender,
            metrics: Arc::clone(&self.metrics),
            workers: workers.clone(),
        };
        let handle = match workers.spawn(pump.run()) {
            Ok(handle) => handle,
            Err(err) => {
                self.state = NodeState::Error;
                return Err(err);
            }
        };

        self.pool = Some(pool);
        self.runtime = Some(RootRuntime {
            queue: output,
            pump: handle,
            workers,
        });
        self.transition(NodeState::Active)?;
        info!(
            node = %self.name,
            batch_size = self.config.batch_size,
            max_concurrent_batches = self.config.max_concurrent_batches,
            read_buffer_size = self.config.read_buffer_size,
            joins = self.joins.len(),
            "Reader opened"
        );
        Ok(())
    }

    /// Next joined item in source order, `Ok(None)` once the stream has ended.
    ///
    /// A fatal failure anywhere in the tree is returned exactly once; the reader is
    /// then finished and further reads report end-of-stream.
    pub async fn read(&mut self) -> BatchResult<Option<T>> {
        match self.state {
            NodeState::New | NodeState::Opened => {
                return Err(BatchError::InvalidState(format!(
                    "reader {} read before open",
                    self.name
                )))
            }
            NodeState::Closed => {
                return Err(BatchError::InvalidState(format!(
                    "reader {} read after close",
                    self.name
                )))
            }
            NodeState::Completed | NodeState::Error => return Ok(None),
            NodeState::Active => {}
        }

        let runtime = self.runtime.as_mut().ok_or_else(|| {
            BatchError::InvalidState(format!("reader {} has no running pump", self.name))
        })?;
        match runtime.queue.next().await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => {
                self.state = NodeState::Completed;
                let metrics = self.metrics.snapshot();
                info!(
                    node = %self.name,
                    items_read = metrics.items_read,
                    items_emitted = metrics.items_emitted,
                    batches = metrics.batches_completed,
                    "Reader reached end-of-stream"
                );
                Ok(None)
            }
            Err(err) => {
                self.state = NodeState::Error;
                error!(node = %self.name, error = %err, "Reader failed");
                Err(err)
            }
        }
    }

    /// Release the tree: stop the pump, abort outstanding tasks, discard buffered
    /// output and empty the pool. Closing twice is a no-op.
    pub async fn close(&mut self) -> BatchResult<()> {
        if self.state == NodeState::Closed {
            debug!(node = %self.name, "Reader already closed");
            return Ok(());
        }

        if let Some(mut runtime) = self.runtime.take() {
            if !runtime.pump.is_finished() {
                warn!(node = %self.name, "Closing reader before end-of-stream");
                runtime.pump.abort();
            }
            runtime.workers.shutdown();
            let discarded = runtime.queue.drain();
            if discarded > 0 {
                debug!(node = %self.name, discarded, "Discarded undelivered items");
            }
        }
        if let Some(pool) = self.pool.take() {
            pool.clear_all();
        }

        self.transition(NodeState::Closed)?;
        info!(node = %self.name, "Reader closed");
        Ok(())
    }

    /// Run this node as the child of one parent batch, merging its items into the
    /// parent's partition behind `edge`
    pub(crate) fn run_as_child(
        mut self,
        edge: JoinEdge<T, K>,
        resources: TreeResources<T, K>,
        context: ExecutionContext,
    ) -> BoxFuture<'static, BatchResult<NodeReport>> {
        self.run_child(edge, resources, context).boxed()
    }

    async fn run_child(
        mut self,
        edge: JoinEdge<T, K>,
        resources: TreeResources<T, K>,
        context: ExecutionContext,
    ) -> BatchResult<NodeReport> {
        self.transition(NodeState::Opened)?;
        let mut source = self.take_source()?;
        if let Err(err) = source.open(&context).await {
            self.state = NodeState::Error;
            return Err(BatchError::SourceOpen {
                node: self.name.clone(),
                message: err.to_string(),
            });
        }
        self.transition(NodeState::Active)?;

        let pipeline = Arc::new(self.pipeline(Some(edge.clone()), resources, context));
        let outcome = run_child_batches(&mut *source, &pipeline, &self.config, &self.metrics).await;
        let closed = close_source(&mut *source, &self.name).await;

        match outcome.and(closed) {
            Ok(()) => {
                self.transition(NodeState::Completed)?;
                self.transition(NodeState::Closed)?;
                Ok(self.report(edge.matched_count()))
            }
            Err(err) => {
                self.state = NodeState::Error;
                Err(err)
            }
        }
    }
}

/// A root node is itself a source, so a tree can feed another reader
#[async_trait]
impl<T, K> ItemSource<T> for ReaderNode<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
{
    async fn open(&mut self, context: &ExecutionContext) -> BatchResult<()> {
        ReaderNode::open(self, context).await
    }

    async fn read(&mut self) -> BatchResult<Option<T>> {
        ReaderNode::read(self).await
    }

    async fn close(&mut self) -> BatchResult<()> {
        ReaderNode::close(self).await
    }
}

struct RootPump<T, K> {
    config: ReaderConfig,
    source: Box<dyn ItemSource<T>>,
    pipeline: Arc<BatchPipeline<T, K>>,
    sender: QueueSender<T>,
    metrics: Arc<ReaderMetrics>,
    workers: WorkerPool,
}

impl<T, K> RootPump<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
{
    async fn run(self) {
        let sender = self.sender.clone();
        let node = self.pipeline.node.clone();
        if let Err(err) = self.pump().await {
            error!(node = %node, error = %err, "Reader pump failed");
            sender.fail(err);
        }
        sender.finish().await;
    }

    /// Dispatch batches from a reader task and emit their results in dispatch order.
    /// The bounded batch channel caps how far reading can run ahead of the consumer.
    async fn pump(self) -> BatchResult<()> {
        let RootPump {
            config,
            source,
            pipeline,
            sender,
            metrics,
            workers,
        } = self;

        let (batch_tx, mut batch_rx) = mpsc::channel::<InFlightBatch<T>>(config.max_concurrent_batches);
        let reader = workers.spawn(dispatch_batches(
            source,
            Arc::clone(&pipeline),
            config,
            workers.clone(),
            Arc::clone(&metrics),
            batch_tx,
        ))?;

        let mut drained = Ok(());
        while let Some((batch_index, handle)) = batch_rx.recv().await {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(join_error.into()),
            };
            metrics.record_batch_completed();
            match result {
                Ok(items) => {
                    let emitted = sender.send_all(items).await?;
                    metrics.record_items_emitted(emitted);
                }
                Err(err) => {
                    error!(node = %pipeline.node, batch = batch_index, error = %err, "Batch failed");
                    drained = Err(err);
                    break;
                }
            }
        }
        drop(batch_rx);

        let read = match reader.await {
            Ok(result) => result,
            Err(join_error) => Err(join_error.into()),
        };
        drained.and(read)
    }
}

async fn dispatch_batches<T, K>(
    mut source: Box<dyn ItemSource<T>>,
    pipeline: Arc<BatchPipeline<T, K>>,
    config: ReaderConfig,
    workers: WorkerPool,
    metrics: Arc<ReaderMetrics>,
    batch_tx: mpsc::Sender<InFlightBatch<T>>,
) -> BatchResult<()>
where
    T: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
{
    let outcome = dispatch_loop(&mut *source, &pipeline, &config, &workers, &metrics, &batch_tx).await;
    drop(batch_tx);
    outcome.and(close_source(&mut *source, &pipeline.node).await)
}

async fn dispatch_loop<T, K, S>(
    source: &mut S,
    pipeline: &Arc<BatchPipeline<T, K>>,
    config: &ReaderConfig,
    workers: &WorkerPool,
    metrics: &ReaderMetrics,
    batch_tx: &mpsc::Sender<InFlightBatch<T>>,
) -> BatchResult<()>
where
    T: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
    S: ItemSource<T> + ?Sized,
{
    let mut batch_index = 0;
    loop {
        let (batch, exhausted) = read_batch(source, config, &pipeline.node, metrics).await?;
        if !batch.is_empty() {
            batch_index += 1;
            metrics.record_batch_dispatched();
            let handle = workers.spawn(Arc::clone(pipeline).process(batch_index, batch))?;
            batch_tx
                .send((batch_index, handle))
                .await
                .map_err(|_| BatchError::QueueClosed("batch channel closed".to_string()))?;
        }
        if exhausted {
            debug!(node = %pipeline.node, batches = batch_index, "Source exhausted");
            return Ok(());
        }
    }
}

async fn run_child_batches<T, K, S>(
    source: &mut S,
    pipeline: &Arc<BatchPipeline<T, K>>,
    config: &ReaderConfig,
    metrics: &ReaderMetrics,
) -> BatchResult<()>
where
    T: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
    S: ItemSource<T> + ?Sized,
{
    let mut batch_index = 0;
    loop {
        let (batch, exhausted) = read_batch(source, config, &pipeline.node, metrics).await?;
        if !batch.is_empty() {
            batch_index += 1;
            metrics.record_batch_dispatched();
            let result = Arc::clone(pipeline).process(batch_index, batch).await;
            metrics.record_batch_completed();
            metrics.record_items_emitted(result?.len());
        }
        if exhausted {
            return Ok(());
        }
    }
}

/// Read up to one batch of items; the flag reports whether the source is exhausted
async fn read_batch<T, S>(
    source: &mut S,
    config: &ReaderConfig,
    node: &str,
    metrics: &ReaderMetrics,
) -> BatchResult<(Vec<T>, bool)>
where
    S: ItemSource<T> + ?Sized,
{
    let mut batch = Vec::with_capacity(config.batch_size);
    while batch.len() < config.batch_size {
        match read_with_retry(source, config.read_retry_limit, node, metrics).await? {
            Some(item) => batch.push(item),
            None => return Ok((batch, true)),
        }
    }
    Ok((batch, false))
}

async fn close_source<T, S>(source: &mut S, node: &str) -> BatchResult<()>
where
    S: ItemSource<T> + ?Sized,
{
    source.close().await.map_err(|err| {
        warn!(node = %node, error = %err, "Failed to close reader source");
        BatchError::SourceClose {
            node: node.to_string(),
            message: err.to_string(),
        }
    })
}
