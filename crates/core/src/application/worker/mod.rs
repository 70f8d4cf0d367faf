// Worker - Queue consume loop

pub mod constants;
mod pool;
mod shutdown;
mod stats;

use constants::*;
pub use pool::{WorkerPool, WorkerPoolHandle};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use stats::{StatsSnapshot, WorkerStats};

use crate::domain::{decode_task, ImageResultRecord, ImageTask, PipelineStage, QueueSpec, ResultKey};
use crate::error::{AppError, Result};
use crate::port::{
    AckMode, ConsumeOptions, Delivery, IdProvider, ImageTranscoder, QueueConnection, ResultLedger,
    ResultSink, TimeProvider,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Everything a worker needs besides the broker connection.
/// Cloned into every worker of a pool.
#[derive(Clone)]
pub struct PipelineContext {
    pub transcoder: Arc<dyn ImageTranscoder>,
    pub sink: Arc<dyn ResultSink>,
    pub ledger: Arc<dyn ResultLedger>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_provider: Arc<dyn IdProvider>,
    pub stats: Arc<WorkerStats>,
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Persisted and acked
    Processed { key: String },
    /// Failed with a transient error, handed back to the broker
    Requeued { stage: PipelineStage },
    /// Failed and dropped (permanent error, second failure, or auto-ack)
    Failed { stage: PipelineStage },
    /// Body could not be decoded into a task
    Rejected,
    /// Processing task panicked
    Panicked,
}

/// Error tagged with the stage it happened in
#[derive(Debug)]
struct StageFailure {
    stage: PipelineStage,
    error: AppError,
}

impl StageFailure {
    fn persisting(error: AppError) -> Self {
        Self {
            stage: PipelineStage::Persisting,
            error,
        }
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Worker consumes image tasks from one queue over its own channel
pub struct Worker {
    id: usize,
    queue: QueueSpec,
    ack_mode: AckMode,
    connection: Arc<dyn QueueConnection>,
    ctx: PipelineContext,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: QueueSpec,
        ack_mode: AckMode,
        connection: Arc<dyn QueueConnection>,
        ctx: PipelineContext,
    ) -> Self {
        Self {
            id,
            queue,
            ack_mode,
            connection,
            ctx,
        }
    }

    /// Run the consume loop until shutdown or until the broker closes the
    /// subscription.
    ///
    /// Shutdown is only observed between deliveries: the delivery in flight
    /// is always finished and settled first.
    ///
    /// # Errors
    /// - AppError::Channel if the channel cannot be opened or the consumer
    ///   cannot be registered
    /// - AppError::QueueDeclaration if the queue exists with other parameters
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let channel = self.connection.open_channel().await?;
        channel.declare_queue(&self.queue).await?;

        let consumer_tag = format!(
            "{}-{}-{}",
            CONSUMER_TAG_PREFIX,
            self.id,
            self.ctx.id_provider.generate_id()
        );
        let mut subscription = channel
            .consume(
                &self.queue.name,
                ConsumeOptions {
                    consumer_tag: consumer_tag.clone(),
                    ack_mode: self.ack_mode,
                },
            )
            .await?;

        info!(
            worker = self.id,
            queue = %self.queue.name,
            consumer_tag = %consumer_tag,
            ack_mode = ?self.ack_mode,
            "Worker started"
        );

        loop {
            if shutdown.is_shutdown() {
                info!(worker = self.id, "Worker shutting down");
                break;
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!(worker = self.id, "Worker interrupted while idle");
                    break;
                }
                next = subscription.next_delivery() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.handle_delivery(delivery).await;
                }
                Some(Err(e)) => {
                    error!(worker = self.id, error = %e, "Subscription error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(worker = self.id, "Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
                None => {
                    warn!(worker = self.id, "Subscription closed by broker");
                    break;
                }
            }
        }

        drop(subscription);
        if let Err(e) = channel.close().await {
            warn!(worker = self.id, error = %e, "Failed to close channel");
        }
        info!(worker = self.id, queue = %self.queue.name, "Worker stopped");
        Ok(())
    }

    /// Process one delivery and settle it with the broker.
    ///
    /// Never fails: every error is logged, counted, and turned into an
    /// outcome so the consume loop can move on to the next delivery.
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let tag = delivery.delivery_tag;

        let task = match decode_task(delivery.content_type.as_deref(), &delivery.body) {
            Ok(task) => task,
            Err(e) => {
                warn!(
                    worker = self.id,
                    delivery_tag = tag,
                    error = %e,
                    "Rejecting malformed message"
                );
                self.ctx.stats.record_failed();
                self.reject(&delivery).await;
                return DeliveryOutcome::Rejected;
            }
        };

        info!(
            worker = self.id,
            delivery_tag = tag,
            product_id = ?task.product_id,
            image_url = %task.image_url,
            redelivered = delivery.redelivered,
            "Received image task"
        );

        // Spawned so a panic inside the transcoder cannot take the worker down.
        // The guard aborts it if this worker is cancelled mid-delivery.
        let ctx = self.ctx.clone();
        let task_for_exec = task.clone();
        let mut processing =
            AbortOnDrop(tokio::spawn(async move { process_task(&ctx, &task_for_exec).await }));

        match (&mut processing.0).await {
            Ok(Ok(key)) => {
                if let Err(e) = delivery.ack().await {
                    // Result is persisted; a redelivery rewrites the same key
                    warn!(worker = self.id, delivery_tag = tag, error = %e, "Ack failed");
                }
                self.ctx.stats.record_processed();
                info!(
                    worker = self.id,
                    delivery_tag = tag,
                    image_url = %task.image_url,
                    result_key = %key,
                    "Image processed"
                );
                DeliveryOutcome::Processed {
                    key: key.as_str().to_string(),
                }
            }
            Ok(Err(failure)) => {
                self.ctx.stats.record_failed();
                let requeue = self.ack_mode == AckMode::Manual
                    && failure.error.is_transient()
                    && !delivery.redelivered;

                error!(
                    worker = self.id,
                    delivery_tag = tag,
                    image_url = %task.image_url,
                    stage = %failure.stage,
                    error = %failure.error,
                    requeue,
                    "Image processing failed"
                );

                if requeue {
                    match delivery.nack(true).await {
                        Ok(()) => self.ctx.stats.record_requeued(),
                        Err(e) => {
                            warn!(worker = self.id, delivery_tag = tag, error = %e, "Nack failed")
                        }
                    }
                    DeliveryOutcome::Requeued {
                        stage: failure.stage,
                    }
                } else {
                    self.reject(&delivery).await;
                    DeliveryOutcome::Failed {
                        stage: failure.stage,
                    }
                }
            }
            Err(join_err) => {
                self.ctx.stats.record_failed();
                if join_err.is_panic() {
                    error!(worker = self.id, delivery_tag = tag, image_url = %task.image_url, "Image task panicked: {:?}", join_err);
                } else {
                    error!(worker = self.id, delivery_tag = tag, "Image task cancelled: {:?}", join_err);
                }
                self.reject(&delivery).await;
                DeliveryOutcome::Panicked
            }
        }
    }

    /// Nack without requeue. No-op under auto-ack.
    async fn reject(&self, delivery: &Delivery) {
        if delivery.is_auto_acked() {
            return;
        }
        match delivery.nack(false).await {
            Ok(()) => self.ctx.stats.record_rejected(),
            Err(e) => warn!(
                worker = self.id,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Nack failed"
            ),
        }
    }
}

/// Fetching -> Decoding -> Encoding (inside the transcoder) -> Persisting
async fn process_task(
    ctx: &PipelineContext,
    task: &ImageTask,
) -> std::result::Result<ResultKey, StageFailure> {
    debug!(image_url = %task.image_url, stage = %PipelineStage::Fetching, "Transcoding image");
    let image = ctx
        .transcoder
        .transcode(&task.image_url)
        .await
        .map_err(|e| StageFailure {
            stage: e.stage(),
            error: e.into(),
        })?;

    let key = ResultKey::for_task(task);
    debug!(
        image_url = %task.image_url,
        stage = %PipelineStage::Persisting,
        bytes = image.bytes.len(),
        result_key = %key,
        "Persisting compressed image"
    );
    let location = ctx
        .sink
        .write(&key, &image)
        .await
        .map_err(StageFailure::persisting)?;

    match task.product_id {
        Some(product_id) => {
            let record = ImageResultRecord::new(
                product_id,
                &key,
                location,
                &image,
                ctx.time_provider.now_millis(),
            );
            ctx.ledger
                .record(&record)
                .await
                .map_err(StageFailure::persisting)?;
        }
        None => debug!(result_key = %key, "No product id, skipping result ledger"),
    }

    Ok(key)
}
