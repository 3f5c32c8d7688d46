// Reader tree runtime
//
// Reader nodes, the per-batch pipeline they run, and the pieces shared across a
// tree: worker pool, output queue, lifecycle state and metrics.

pub mod metrics;
pub mod node;
pub mod pipeline;
pub mod queue;
pub mod state;
pub mod worker;

// Re-export main types for convenient access
pub use metrics::{MetricsSnapshot, ReaderMetrics};
pub use node::{NodeReport, ReaderNode, ReaderNodeBuilder};
pub use pipeline::{FilterFn, MapperFn, TreeResources};
pub use queue::{OutputQueue, QueueMessage, QueueSender};
pub use state::NodeState;
pub use worker::WorkerPool;
