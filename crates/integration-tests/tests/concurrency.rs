//! Concurrency tests: several workers over one broker connection

mod common;

use common::*;
use imgpipe_core::application::{Producer, ProducerMode, WorkerPool};
use imgpipe_core::domain::QueueSpec;
use imgpipe_core::port::message_queue::mocks::InMemoryBroker;
use imgpipe_core::port::transcoder::mocks::{MockBehavior, MockTranscoder};
use imgpipe_core::port::{AckMode, QueueConnection};
use imgpipe_infra_media::FsResultSink;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

async fn run_two_workers_over_100_messages(ack_mode: AckMode) {
    let tmp = tempfile::tempdir().unwrap();
    let out_dir = tmp.path().join("out");
    let catalog = catalog(tmp.path()).await;
    for id in 1..=100 {
        seed(&catalog, id, &[&format!("https://cdn.test/{}.jpg", id)]).await;
    }

    let broker = InMemoryBroker::new();
    let channel = broker.open_channel().await.unwrap();
    let report = Producer::new(catalog.clone(), channel, QueueSpec::durable(QUEUE))
        .run()
        .await
        .unwrap();
    assert_eq!(report.published, 100);

    let transcoder = Arc::new(MockTranscoder::new(MockBehavior::Slow(
        Duration::from_millis(2),
    )));
    let sink = Arc::new(FsResultSink::new(&out_dir).await.unwrap());
    let workers = WorkerPool::spawn(
        2,
        QueueSpec::durable(QUEUE),
        ack_mode,
        Arc::new(broker.clone()),
        context(transcoder.clone(), sink, catalog.clone()),
    );

    wait_for(&workers, Duration::from_secs(30), |s| s.processed == 100).await;
    let stats = workers
        .shutdown_and_join(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(stats.processed, 100);
    assert_eq!(stats.failed, 0);
    assert_eq!(transcoder.call_count(), 100);

    let calls: HashSet<String> = transcoder.calls().into_iter().collect();
    assert_eq!(calls.len(), 100, "every URL fetched exactly once");
    assert_eq!(written_files(&out_dir).len(), 100);
    assert_eq!(catalog.count_results().await.unwrap(), 100);
    assert_eq!(broker.message_count(QUEUE), 0);
    assert_eq!(broker.unacked_count(QUEUE), 0);

    // Everything recorded: a pending-only re-run has nothing left to do
    let channel = broker.open_channel().await.unwrap();
    let rerun = Producer::new(catalog, channel, QueueSpec::durable(QUEUE))
        .with_mode(ProducerMode::PendingOnly)
        .run()
        .await
        .unwrap();
    assert_eq!(rerun.published, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_workers_process_100_messages_exactly_once_auto_ack() {
    run_two_workers_over_100_messages(AckMode::Auto).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_workers_process_100_messages_exactly_once_manual_ack() {
    run_two_workers_over_100_messages(AckMode::Manual).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_drains_in_flight_deliveries() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = catalog(tmp.path()).await;
    for id in 1..=20 {
        seed(&catalog, id, &[&format!("https://cdn.test/{}.jpg", id)]).await;
    }

    let broker = InMemoryBroker::new();
    let channel = broker.open_channel().await.unwrap();
    Producer::new(catalog.clone(), channel, QueueSpec::durable(QUEUE))
        .run()
        .await
        .unwrap();

    let transcoder = Arc::new(MockTranscoder::new(MockBehavior::Slow(
        Duration::from_millis(50),
    )));
    let sink = Arc::new(FsResultSink::new(tmp.path().join("out")).await.unwrap());
    let workers = WorkerPool::spawn(
        3,
        QueueSpec::durable(QUEUE),
        AckMode::Manual,
        Arc::new(broker.clone()),
        context(transcoder.clone(), sink, catalog.clone()),
    );

    wait_for(&workers, Duration::from_secs(10), |s| s.processed >= 1).await;
    let stats = workers
        .shutdown_and_join(Duration::from_secs(5))
        .await
        .unwrap();

    // Every started delivery finished; the rest stayed in the queue
    assert_eq!(stats.failed, 0);
    assert_eq!(transcoder.call_count() as u64, stats.processed);
    assert_eq!(broker.unacked_count(QUEUE), 0);
    assert_eq!(
        broker.message_count(QUEUE) as u64 + stats.processed,
        20
    );
}
