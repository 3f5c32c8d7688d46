//! # Join Specifications
//!
//! A [`JoinSpec`] describes one parent → child edge of a reader tree: how to build
//! the child node for a batch, how to key items on both sides, how to merge a child
//! item into the matching parent items, and whether unmatched parent items survive.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::BatchResult;
use crate::pool::{JoinId, PartitionId};
use crate::reader::ReaderNode;

/// Extracts the join key; `None` means the item does not take part in the join
pub type KeyFn<T, K> = Arc<dyn Fn(&T) -> Option<K> + Send + Sync>;

/// Folds an incoming child item into an existing pooled item
pub type MergeFn<T> = Arc<dyn Fn(&mut T, &T) + Send + Sync>;

/// Builds the child node for one parent batch
pub type ChildProvider<T, K> = Arc<dyn Fn(&[T]) -> BatchResult<ReaderNode<T, K>> + Send + Sync>;

pub struct JoinSpec<T, K> {
    id: JoinId,
    name: Option<String>,
    provider: ChildProvider<T, K>,
    key_fn: KeyFn<T, K>,
    merge_fn: MergeFn<T>,
    inner_join: bool,
}

impl<T, K> Clone for JoinSpec<T, K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            provider: Arc::clone(&self.provider),
            key_fn: Arc::clone(&self.key_fn),
            merge_fn: Arc::clone(&self.merge_fn),
            inner_join: self.inner_join,
        }
    }
}

impl<T, K> fmt::Debug for JoinSpec<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("inner_join", &self.inner_join)
            .finish_non_exhaustive()
    }
}

impl<T, K> JoinSpec<T, K> {
    /// Create an outer join edge with a freshly assigned [`JoinId`]
    pub fn new<P, KF, MF>(provider: P, key_fn: KF, merge_fn: MF) -> Self
    where
        P: Fn(&[T]) -> BatchResult<ReaderNode<T, K>> + Send + Sync + 'static,
        KF: Fn(&T) -> Option<K> + Send + Sync + 'static,
        MF: Fn(&mut T, &T) + Send + Sync + 'static,
    {
        Self {
            id: JoinId::next(),
            name: None,
            provider: Arc::new(provider),
            key_fn: Arc::new(key_fn),
            merge_fn: Arc::new(merge_fn),
            inner_join: false,
        }
    }

    /// Drop parent items the child never matched
    pub fn inner_join(mut self, inner_join: bool) -> Self {
        self.inner_join = inner_join;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(&self) -> JoinId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    pub fn is_inner_join(&self) -> bool {
        self.inner_join
    }

    pub fn key_fn(&self) -> &KeyFn<T, K> {
        &self.key_fn
    }

    pub fn merge_fn(&self) -> &MergeFn<T> {
        &self.merge_fn
    }

    pub(crate) fn provide(&self, items: &[T]) -> BatchResult<ReaderNode<T, K>> {
        (self.provider)(items)
    }
}

/// Parent-side view of a join handed to the child node it spawned
pub struct JoinEdge<T, K> {
    pub partition: PartitionId,
    pub key_fn: KeyFn<T, K>,
    pub merge_fn: MergeFn<T>,
    matched: Option<Arc<Mutex<HashSet<K>>>>,
}

impl<T, K> Clone for JoinEdge<T, K> {
    fn clone(&self) -> Self {
        Self {
            partition: self.partition,
            key_fn: Arc::clone(&self.key_fn),
            merge_fn: Arc::clone(&self.merge_fn),
            matched: self.matched.clone(),
        }
    }
}

impl<T, K> JoinEdge<T, K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(spec: &JoinSpec<T, K>, partition: PartitionId) -> Self {
        Self {
            partition,
            key_fn: Arc::clone(&spec.key_fn),
            merge_fn: Arc::clone(&spec.merge_fn),
            matched: spec
                .inner_join
                .then(|| Arc::new(Mutex::new(HashSet::new()))),
        }
    }

    /// Remember a key the child merged into at least one parent item
    pub fn record_match(&self, key: K) {
        if let Some(matched) = &self.matched {
            matched.lock().insert(key);
        }
    }

    pub fn tracks_matches(&self) -> bool {
        self.matched.is_some()
    }

    /// Whether `key` was matched; always true for outer joins
    pub fn was_matched(&self, key: &K) -> bool {
        match &self.matched {
            Some(matched) => matched.lock().contains(key),
            None => true,
        }
    }

    pub fn matched_count(&self) -> usize {
        self.matched.as_ref().map_or(0, |m| m.lock().len())
    }
}
