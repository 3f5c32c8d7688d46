use proptest::prelude::*;
use tasker_batch::ReaderConfig;

/// Strategy for small reader configurations that exercise batching edges
pub fn reader_config_strategy() -> impl Strategy<Value = ReaderConfig> {
    (1usize..=16, 1usize..=4, 1usize..=8).prop_map(
        |(batch_size, max_concurrent_batches, read_buffer_size)| ReaderConfig {
            batch_size,
            max_concurrent_batches,
            read_buffer_size,
            read_retry_limit: 1,
        },
    )
}

/// Strategy for source contents
pub fn items_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-1000i64..1000, 0..200)
}

/// Strategy for parent join keys drawn from a small domain so duplicates are common
pub fn parent_keys_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..8, 0..60)
}
