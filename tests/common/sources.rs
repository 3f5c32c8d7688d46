use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tasker_batch::{BatchError, BatchResult, ExecutionContext, ItemSource, ReaderNode};

/// Keyed row used by join tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: u64,
    pub fields: BTreeMap<String, i64>,
}

impl Record {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: i64) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<i64> {
        self.fields.get(field).copied()
    }
}

pub fn by_id(record: &Record) -> Option<u64> {
    Some(record.id)
}

/// Copy every field of the child record onto the parent
pub fn union_fields(existing: &mut Record, incoming: &Record) {
    existing
        .fields
        .extend(incoming.fields.iter().map(|(k, v)| (k.clone(), *v)));
}

/// Counts lifecycle calls made on a scripted source
#[derive(Debug, Clone, Default)]
pub struct SourceProbe {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl SourceProbe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Source replaying a fixed script of items and read failures
pub struct ScriptedSource<T> {
    script: VecDeque<Result<T, String>>,
    probe: SourceProbe,
    delay: Option<Duration>,
    fail_open: bool,
}

impl<T> ScriptedSource<T> {
    pub fn new(script: impl IntoIterator<Item = Result<T, String>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            probe: SourceProbe::default(),
            delay: None,
            fail_open: false,
        }
    }

    pub fn items(items: impl IntoIterator<Item = T>) -> Self {
        Self::new(items.into_iter().map(Ok))
    }

    pub fn with_probe(mut self, probe: &SourceProbe) -> Self {
        self.probe = probe.clone();
        self
    }

    /// Sleep before every read
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

#[async_trait]
impl<T: Send> ItemSource<T> for ScriptedSource<T> {
    async fn open(&mut self, _context: &ExecutionContext) -> BatchResult<()> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(BatchError::InvalidState("connection refused".to_string()));
        }
        Ok(())
    }

    async fn read(&mut self) -> BatchResult<Option<T>> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.script.pop_front() {
            Some(Ok(item)) => Ok(Some(item)),
            Some(Err(message)) => Err(BatchError::read(message)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> BatchResult<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Read until end-of-stream or the first error
pub async fn read_all<T, K>(reader: &mut ReaderNode<T, K>) -> BatchResult<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
{
    let mut items = Vec::new();
    while let Some(item) = reader.read().await? {
        items.push(item);
    }
    Ok(items)
}

/// Run a future on a fresh multi-thread runtime, for use inside proptest bodies
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build test runtime")
        .block_on(future)
}
