//! Queue durability and acknowledgement semantics, as seen by the producer
//! and the workers

mod common;

use common::*;
use imgpipe_core::application::{Producer, WorkerPool};
use imgpipe_core::domain::QueueSpec;
use imgpipe_core::port::message_queue::mocks::InMemoryBroker;
use imgpipe_core::port::result_sink::mocks::RecordingSink;
use imgpipe_core::port::transcoder::mocks::{MockBehavior, MockTranscoder};
use imgpipe_core::port::{AckMode, OutgoingMessage, QueueConnection};
use imgpipe_core::AppError;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_published_work_survives_broker_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = catalog(tmp.path()).await;
    seed(&catalog, 1, &["https://cdn.test/a.jpg", "https://cdn.test/b.jpg"]).await;

    let broker = InMemoryBroker::new();
    let channel = broker.open_channel().await.unwrap();
    Producer::new(catalog.clone(), channel.clone(), QueueSpec::durable(QUEUE))
        .run()
        .await
        .unwrap();

    // A transient message next to the persistent ones
    channel
        .publish(
            QUEUE,
            OutgoingMessage {
                body: b"https://cdn.test/transient.jpg".to_vec(),
                content_type: "text/plain".into(),
                persistent: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(broker.message_count(QUEUE), 3);

    broker.restart();

    assert_eq!(broker.message_count(QUEUE), 2);
    // Old channels are gone after a restart
    assert!(matches!(
        channel.declare_queue(&QueueSpec::durable(QUEUE)).await,
        Err(AppError::Channel(_))
    ));

    // Workers on a fresh channel pick the surviving work up
    let sink = Arc::new(RecordingSink::new());
    let workers = WorkerPool::spawn(
        1,
        QueueSpec::durable(QUEUE),
        AckMode::Manual,
        Arc::new(broker.clone()),
        context(Arc::new(MockTranscoder::new_success()), sink.clone(), catalog),
    );
    wait_for(&workers, Duration::from_secs(5), |s| s.processed == 2).await;
    workers
        .shutdown_and_join(Duration::from_secs(5))
        .await
        .unwrap();

    let urls: Vec<String> = sink.writes().into_iter().map(|w| w.source_url).collect();
    assert_eq!(urls, vec!["https://cdn.test/a.jpg", "https://cdn.test/b.jpg"]);
}

#[tokio::test]
async fn test_unacked_delivery_is_redelivered_after_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = catalog(tmp.path()).await;
    seed(&catalog, 1, &["https://cdn.test/slow.jpg"]).await;

    let broker = InMemoryBroker::new();
    let channel = broker.open_channel().await.unwrap();
    Producer::new(catalog.clone(), channel, QueueSpec::durable(QUEUE))
        .run()
        .await
        .unwrap();

    // Worker stuck in a slow fetch when the broker goes away
    let workers = WorkerPool::spawn(
        1,
        QueueSpec::durable(QUEUE),
        AckMode::Manual,
        Arc::new(broker.clone()),
        context(
            Arc::new(MockTranscoder::new(MockBehavior::Slow(Duration::from_millis(300)))),
            Arc::new(RecordingSink::new()),
            catalog.clone(),
        ),
    );
    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.unacked_count(QUEUE) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    broker.restart();
    assert_eq!(broker.message_count(QUEUE), 1);
    assert_eq!(broker.unacked_count(QUEUE), 0);

    // The late ack of the stale delivery fails and is only logged
    let _ = workers.shutdown_and_join(Duration::from_secs(5)).await;
    assert_eq!(broker.message_count(QUEUE), 1);
}

#[tokio::test]
async fn test_auto_ack_loses_failed_message() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = catalog(tmp.path()).await;
    seed(&catalog, 1, &["https://cdn.test/a.jpg"]).await;

    let broker = InMemoryBroker::new();
    let channel = broker.open_channel().await.unwrap();
    Producer::new(catalog.clone(), channel, QueueSpec::durable(QUEUE))
        .run()
        .await
        .unwrap();

    let failing = MockTranscoder::new(MockBehavior::Fail(
        imgpipe_core::port::TranscodeError::Fetch {
            url: "https://cdn.test/a.jpg".into(),
            status: Some(503),
            message: "unavailable".into(),
        },
    ));
    let workers = WorkerPool::spawn(
        1,
        QueueSpec::durable(QUEUE),
        AckMode::Auto,
        Arc::new(broker.clone()),
        context(Arc::new(failing), Arc::new(RecordingSink::new()), catalog),
    );
    let stats = wait_for(&workers, Duration::from_secs(5), |s| s.failed == 1).await;
    workers
        .shutdown_and_join(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(stats.requeued, 0);
    assert_eq!(broker.message_count(QUEUE), 0);
    assert_eq!(broker.unacked_count(QUEUE), 0);
}
