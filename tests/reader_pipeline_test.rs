//! Reader Pipeline Tests
//!
//! Batching, filtering and expansion on a root reader without joins.

mod common;

use common::*;
use serde_json::json;
use tasker_batch::{ExecutionContext, IterSource, NodeState, ReaderNode};

type Reader = ReaderNode<i64, i64>;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn passthrough_preserves_source_order() {
    let mut reader: Reader = ReaderNode::builder(IterSource::new(1..=1000))
        .batch_size(7)
        .max_concurrent_batches(3)
        .read_buffer_size(16)
        .build()
        .unwrap();

    reader.open(&ExecutionContext::new()).await.unwrap();
    let items = read_all(&mut reader).await.unwrap();

    assert_eq!(items, (1..=1000).collect::<Vec<_>>());
    assert_eq!(reader.state(), NodeState::Completed);

    let metrics = reader.metrics();
    assert_eq!(metrics.items_read, 1000);
    assert_eq!(metrics.batches_dispatched, 143);
    assert_eq!(metrics.batches_completed, 143);
    assert_eq!(metrics.items_emitted, 1000);
    assert_eq!(metrics.in_flight_batches, 0);

    reader.close().await.unwrap();
    assert_eq!(reader.state(), NodeState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn filter_drops_rejected_items() {
    let mut reader: Reader = ReaderNode::builder(IterSource::new(1..=10))
        .batch_size(3)
        .filter(|n: &i64, _ctx: &ExecutionContext| n % 2 == 0)
        .build()
        .unwrap();

    reader.open(&ExecutionContext::new()).await.unwrap();
    assert_eq!(read_all(&mut reader).await.unwrap(), vec![2, 4, 6, 8, 10]);
    assert_eq!(reader.metrics().items_dropped, 5);
    reader.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mapper_expands_items_in_place() {
    let mut reader: Reader = ReaderNode::builder(IterSource::new(1..=5))
        .batch_size(2)
        .mapper(|n: i64, _ctx: &ExecutionContext| vec![n, n * 2])
        .build()
        .unwrap();

    reader.open(&ExecutionContext::new()).await.unwrap();
    assert_eq!(
        read_all(&mut reader).await.unwrap(),
        vec![1, 2, 2, 4, 3, 6, 4, 8, 5, 10]
    );
    reader.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn filter_runs_before_expansion() {
    let mut reader: Reader = ReaderNode::builder(IterSource::new(1..=5))
        .filter(|n: &i64, _ctx: &ExecutionContext| *n > 2)
        .mapper(|n: i64, _ctx: &ExecutionContext| vec![n, -n])
        .build()
        .unwrap();

    reader.open(&ExecutionContext::new()).await.unwrap();
    assert_eq!(
        read_all(&mut reader).await.unwrap(),
        vec![3, -3, 4, -4, 5, -5]
    );
    reader.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mapper_may_remove_items() {
    let mut reader: Reader = ReaderNode::builder(IterSource::new(1..=6))
        .batch_size(4)
        .mapper(|n: i64, _ctx: &ExecutionContext| if n == 3 { Vec::new() } else { vec![n] })
        .build()
        .unwrap();

    reader.open(&ExecutionContext::new()).await.unwrap();
    assert_eq!(read_all(&mut reader).await.unwrap(), vec![1, 2, 4, 5, 6]);
    reader.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn filter_sees_the_execution_context() {
    let context = ExecutionContext::new();
    context.put("threshold", json!(7));

    let mut reader: Reader = ReaderNode::builder(IterSource::new(1..=10))
        .filter(|n: &i64, ctx: &ExecutionContext| {
            ctx.get_as::<i64>("threshold").map_or(true, |t| *n >= t)
        })
        .build()
        .unwrap();

    reader.open(&context).await.unwrap();
    assert_eq!(read_all(&mut reader).await.unwrap(), vec![7, 8, 9, 10]);
    reader.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_source_ends_immediately() {
    let mut reader: Reader = ReaderNode::builder(IterSource::new(Vec::new()))
        .build()
        .unwrap();

    reader.open(&ExecutionContext::new()).await.unwrap();
    assert_eq!(reader.read().await.unwrap(), None);
    assert_eq!(reader.metrics().batches_dispatched, 0);
    reader.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reads_after_end_of_stream_keep_returning_none() {
    let mut reader: Reader = ReaderNode::builder(IterSource::new(vec![1]))
        .build()
        .unwrap();

    reader.open(&ExecutionContext::new()).await.unwrap();
    assert_eq!(reader.read().await.unwrap(), Some(1));
    for _ in 0..3 {
        assert_eq!(reader.read().await.unwrap(), None);
    }
    reader.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn final_partial_batch_is_dispatched() {
    let mut reader: Reader = ReaderNode::builder(IterSource::new(1..=11))
        .batch_size(5)
        .build()
        .unwrap();

    reader.open(&ExecutionContext::new()).await.unwrap();
    assert_eq!(read_all(&mut reader).await.unwrap().len(), 11);
    assert_eq!(reader.metrics().batches_dispatched, 3);
    reader.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_reader_can_feed_another_reader() {
    let upstream: Reader = ReaderNode::builder(IterSource::new(1..=6))
        .name("upstream")
        .batch_size(2)
        .mapper(|n: i64, _ctx: &ExecutionContext| vec![n * 10])
        .build()
        .unwrap();

    let mut downstream: Reader = ReaderNode::builder(upstream)
        .name("downstream")
        .batch_size(4)
        .filter(|n: &i64, _ctx: &ExecutionContext| *n > 20)
        .build()
        .unwrap();

    downstream.open(&ExecutionContext::new()).await.unwrap();
    assert_eq!(
        read_all(&mut downstream).await.unwrap(),
        vec![30, 40, 50, 60]
    );
    downstream.close().await.unwrap();
}
