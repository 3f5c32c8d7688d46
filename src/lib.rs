#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Batch
//!
//! Recursive, concurrent, key-based join reader for batch item streams.
//!
//! ## Overview
//!
//! A reader tree is built from [`ReaderNode`]s. The root reads its source in
//! fixed-size batches and runs each batch through filtering and expansion on a
//! shared worker pool. For every [`JoinSpec`] attached to a node, the batch's items
//! are pooled by key and a child node is built from the batch; the child's items are
//! merged into every parent item that shares their key. Inner joins drop parent
//! items no child item matched. Children may have children of their own.
//!
//! Joined items are delivered through a bounded output queue in source order.
//! Reading runs ahead of the consumer only as far as the queue and the in-flight
//! batch limit allow.
//!
//! ## Module Organization
//!
//! - [`reader`] - Reader nodes, batch pipeline, worker pool and output queue
//! - [`join`] - Join edge definitions
//! - [`pool`] - Keyed item pool backing the merge-join
//! - [`source`] - Item source contract and read retry policy
//! - [`context`] - Execution context shared with filters, mappers and sources
//! - [`config`] - Configuration loading and validation
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tasker_batch::{ExecutionContext, IterSource, JoinSpec, ReaderNode};
//!
//! # async fn example() -> tasker_batch::BatchResult<()> {
//! let orders = JoinSpec::new(
//!     |customers: &[(u32, String)]| {
//!         let ids: Vec<u32> = customers.iter().map(|(id, _)| *id).collect();
//!         ReaderNode::builder(IterSource::new(ids.into_iter().map(|id| (id, format!("order-{id}")))))
//!             .build()
//!     },
//!     |(id, _): &(u32, String)| Some(*id),
//!     |customer: &mut (u32, String), order: &(u32, String)| {
//!         customer.1.push_str(&format!(" +{}", order.1));
//!     },
//! );
//!
//! let mut reader = ReaderNode::builder(IterSource::new(vec![(1, "ada".to_string())]))
//!     .batch_size(50)
//!     .join(orders)
//!     .build()?;
//!
//! reader.open(&ExecutionContext::new()).await?;
//! while let Some(customer) = reader.read().await? {
//!     println!("{customer:?}");
//! }
//! reader.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod join;
pub mod logging;
pub mod pool;
pub mod reader;
pub mod source;

pub use config::{BatchConfig, ConfigLoader, ConfigurationError, LogFormat, LoggingConfig, ReaderConfig};
pub use context::ExecutionContext;
pub use error::{BatchError, BatchResult};
pub use join::{ChildProvider, JoinEdge, JoinSpec, KeyFn, MergeFn};
pub use logging::init_structured_logging;
pub use pool::{BatchScope, JoinId, KeyedItemPool, PartitionId, SharedItem, UpsertMode, UpsertOutcome};
pub use reader::{MetricsSnapshot, NodeReport, NodeState, ReaderNode, ReaderNodeBuilder, WorkerPool};
pub use source::{read_with_retry, IterSource, ItemSource};
