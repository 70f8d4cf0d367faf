// Worker Pool - N consumers sharing one connection, one channel each

use super::{shutdown_channel, PipelineContext, ShutdownSender, StatsSnapshot, Worker, WorkerStats};
use crate::domain::QueueSpec;
use crate::error::{AppError, Result};
use crate::port::{AckMode, QueueConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub struct WorkerPool;

impl WorkerPool {
    /// Spawn `size` workers on the current runtime.
    ///
    /// Every worker opens its own channel on `connection`, so a prefetch
    /// window and the delivery tags are never shared between workers.
    pub fn spawn(
        size: usize,
        queue: QueueSpec,
        ack_mode: AckMode,
        connection: Arc<dyn QueueConnection>,
        ctx: PipelineContext,
    ) -> WorkerPoolHandle {
        let (shutdown, token) = shutdown_channel();
        let mut tasks = JoinSet::new();

        for id in 0..size {
            let worker = Worker::new(
                id,
                queue.clone(),
                ack_mode,
                Arc::clone(&connection),
                ctx.clone(),
            );
            let token = token.clone();
            tasks.spawn(async move { worker.run(token).await });
        }

        info!(size, queue = %queue.name, ack_mode = ?ack_mode, "Worker pool started");

        WorkerPoolHandle {
            shutdown,
            tasks,
            stats: ctx.stats,
            size,
        }
    }
}

/// Owner of a running pool
pub struct WorkerPoolHandle {
    shutdown: ShutdownSender,
    tasks: JoinSet<Result<()>>,
    stats: Arc<WorkerStats>,
    size: usize,
}

impl WorkerPoolHandle {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Ask every worker to stop after its current delivery
    pub fn shutdown(&self) {
        info!("Worker pool shutdown requested");
        self.shutdown.shutdown();
    }

    /// Wait for the next worker to exit.
    ///
    /// Returns `None` when no worker is left. Cancel-safe.
    pub async fn next_exit(&mut self) -> Option<Result<()>> {
        self.tasks.join_next().await.map(flatten_join)
    }

    /// Wait for every worker to exit. Returns the first worker error.
    pub async fn join(mut self) -> Result<()> {
        drain(&mut self.tasks).await
    }

    /// Signal shutdown and wait up to `timeout` for in-flight deliveries.
    ///
    /// Workers still running after the timeout are aborted; their unacked
    /// deliveries go back to the queue once their channels are gone.
    pub async fn shutdown_and_join(mut self, timeout: Duration) -> Result<StatsSnapshot> {
        self.shutdown();

        let drained = tokio::time::timeout(timeout, drain(&mut self.tasks)).await;
        match drained {
            Ok(result) => {
                let stats = self.stats.snapshot();
                info!(
                    processed = stats.processed,
                    failed = stats.failed,
                    requeued = stats.requeued,
                    rejected = stats.rejected,
                    "Worker pool stopped"
                );
                result.map(|_| stats)
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    remaining = self.tasks.len(),
                    "Workers did not stop in time, aborting"
                );
                self.tasks.abort_all();
                while self.tasks.join_next().await.is_some() {}
                Err(AppError::Internal(format!(
                    "worker pool did not stop within {:?}",
                    timeout
                )))
            }
        }
    }
}

fn flatten_join(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(AppError::Internal(format!("worker task failed: {}", e))),
    }
}

async fn drain(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = flatten_join(joined) {
            error!(error = %e, "Worker exited with error");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{WireFormat, WorkItem};
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::message_queue::mocks::InMemoryBroker;
    use crate::port::result_sink::mocks::RecordingSink;
    use crate::port::time_provider::FixedTimeProvider;
    use crate::port::transcoder::mocks::{MockBehavior, MockTranscoder};
    use crate::port::work_source::mocks::InMemoryCatalog;
    use crate::port::{OutgoingMessage, QueueChannel};
    use std::collections::HashSet;

    const QUEUE: &str = "image_processing_queue";

    fn context(sink: Arc<RecordingSink>) -> PipelineContext {
        PipelineContext {
            transcoder: Arc::new(MockTranscoder::new_success()),
            sink,
            ledger: Arc::new(InMemoryCatalog::default()),
            time_provider: Arc::new(FixedTimeProvider(0)),
            id_provider: Arc::new(SequentialIdProvider::new("pool")),
            stats: Arc::new(WorkerStats::new()),
        }
    }

    #[tokio::test]
    async fn test_pool_processes_each_message_once() {
        let broker = InMemoryBroker::new();
        let channel = broker.open_channel().await.unwrap();
        channel.declare_queue(&QueueSpec::durable(QUEUE)).await.unwrap();
        for id in 1..=40 {
            let body = WireFormat::Json
                .encode(&WorkItem::new(id, format!("https://example.com/{}.jpg", id)))
                .unwrap();
            channel
                .publish(QUEUE, OutgoingMessage::persistent(body, "application/json"))
                .await
                .unwrap();
        }

        let sink = Arc::new(RecordingSink::new());
        let handle = WorkerPool::spawn(
            3,
            QueueSpec::durable(QUEUE),
            AckMode::Manual,
            Arc::new(broker.clone()),
            context(sink.clone()),
        );
        assert_eq!(handle.size(), 3);

        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.stats().processed < 40 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let stats = handle
            .shutdown_and_join(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(stats.processed, 40);

        let keys: HashSet<String> = sink.writes().into_iter().map(|w| w.key).collect();
        assert_eq!(keys.len(), 40);
        assert_eq!(broker.message_count(QUEUE), 0);
        assert_eq!(broker.unacked_count(QUEUE), 0);
    }

    #[tokio::test]
    async fn test_idle_pool_stops_promptly() {
        let broker = InMemoryBroker::new();
        let handle = WorkerPool::spawn(
            2,
            QueueSpec::durable(QUEUE),
            AckMode::Manual,
            Arc::new(broker),
            context(Arc::new(RecordingSink::new())),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = handle
            .shutdown_and_join(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(stats, StatsSnapshot::default());
    }

    #[tokio::test]
    async fn test_workers_exit_when_connection_closes() {
        let broker = InMemoryBroker::new();
        let mut handle = WorkerPool::spawn(
            2,
            QueueSpec::durable(QUEUE),
            AckMode::Manual,
            Arc::new(broker.clone()),
            context(Arc::new(RecordingSink::new())),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close().await.unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(2), handle.next_exit())
            .await
            .unwrap();
        assert!(matches!(exit, Some(Ok(()))));
        assert!(handle.join().await.is_ok());
    }

    #[tokio::test]
    async fn test_timed_out_shutdown_cancels_in_flight_processing() {
        let broker = InMemoryBroker::new();
        let channel = broker.open_channel().await.unwrap();
        channel.declare_queue(&QueueSpec::durable(QUEUE)).await.unwrap();
        let body = WireFormat::Json
            .encode(&WorkItem::new(1, "https://example.com/1.jpg"))
            .unwrap();
        channel
            .publish(QUEUE, OutgoingMessage::persistent(body, "application/json"))
            .await
            .unwrap();

        let sink = Arc::new(RecordingSink::new());
        let ledger = Arc::new(InMemoryCatalog::default());
        let transcoder = Arc::new(MockTranscoder::new(MockBehavior::Slow(
            Duration::from_millis(400),
        )));
        let ctx = PipelineContext {
            transcoder: transcoder.clone(),
            sink: sink.clone(),
            ledger: ledger.clone(),
            ..context(Arc::new(RecordingSink::new()))
        };
        let handle = WorkerPool::spawn(
            1,
            QueueSpec::durable(QUEUE),
            AckMode::Manual,
            Arc::new(broker.clone()),
            ctx,
        );

        tokio::time::timeout(Duration::from_secs(2), async {
            while transcoder.call_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let result = handle.shutdown_and_join(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(AppError::Internal(_))));

        // Past the point where the slow transcode would have finished
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(sink.write_count(), 0);
        assert!(ledger.records().is_empty());
    }
}
