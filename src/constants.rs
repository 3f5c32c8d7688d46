//! # Reader Constants
//!
//! Default sizing for the join reader pipeline and the environment keys the
//! configuration loader and logging setup look at.

/// Items accumulated per dispatched batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Batches a root node may have in flight before its pump blocks
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 20;

/// Capacity of the output queue between the pump and the consumer
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1000;

/// Extra read attempts issued after a failed source read
pub const DEFAULT_READ_RETRY_LIMIT: u32 = 1;

/// Environment variable prefix for configuration overrides
pub const CONFIG_ENV_PREFIX: &str = "TASKER_BATCH";

/// Separator between nested configuration keys in environment variables
pub const CONFIG_ENV_SEPARATOR: &str = "__";

/// Environment variables consulted, in order, to detect the runtime environment
pub const ENVIRONMENT_VARIABLES: [&str; 2] = ["TASKER_ENV", "APP_ENV"];

/// Name given to nodes built without an explicit name
pub const DEFAULT_NODE_NAME: &str = "reader";
