// Composition root: wiring of catalog, broker, producer and worker pool

use crate::config::Config;
use anyhow::{Context, Result};
use imgpipe_core::application::{
    PipelineContext, Producer, ProducerReport, WorkerPool, WorkerPoolHandle, WorkerStats,
};
use imgpipe_core::port::id_provider::UuidProvider;
use imgpipe_core::port::time_provider::SystemTimeProvider;
use imgpipe_core::port::{QueueConnection, WorkSource};
use imgpipe_infra_amqp::AmqpConnection;
use imgpipe_infra_media::{FsResultSink, HttpImageFetcher, HttpImageTranscoder};
use imgpipe_infra_sqlite::{create_pool, run_migrations, SqliteCatalog};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Which roles this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Worker pool + one producer run, until Ctrl-C
    Run,
    /// One producer run, then exit
    Produce,
    /// Worker pool only, until Ctrl-C
    Consume,
}

impl Mode {
    pub fn produces(self) -> bool {
        matches!(self, Mode::Run | Mode::Produce)
    }

    pub fn consumes(self) -> bool {
        matches!(self, Mode::Run | Mode::Consume)
    }
}

pub async fn run(mode: Mode, config: Config) -> Result<()> {
    // 1. Catalog
    info!(database_url = %config.database.url, "Initializing database...");
    let db = create_pool(&config.database.url, config.database.max_connections)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&db).await.context("Migration failed")?;
    let catalog = Arc::new(SqliteCatalog::new(db.clone()));

    // 2. Broker (fatal once the backoff is exhausted)
    let connection: Arc<dyn QueueConnection> = Arc::new(
        AmqpConnection::connect(&config.amqp(), &config.backoff())
            .await
            .context("Broker connection failed")?,
    );

    // 3. Workers first, so the backlog is consumed as soon as it lands
    let workers = if mode.consumes() && config.worker.enabled {
        Some(start_workers(&config, connection.clone(), catalog.clone()).await?)
    } else {
        if mode.consumes() {
            warn!("Workers disabled by configuration");
        }
        None
    };

    // 4. Producer, exactly once per start; a failure is fatal in every mode
    let workers = if mode.produces() && config.producer.enabled {
        match produce_or_stop(&config, connection.as_ref(), catalog.clone(), workers).await {
            Ok(workers) => workers,
            Err(e) => {
                close_connection(connection.as_ref()).await;
                db.close().await;
                return Err(e);
            }
        }
    } else {
        if mode.produces() {
            warn!("Producer disabled by configuration");
        }
        workers
    };

    // 5. Serve until Ctrl-C or until the broker goes away
    if let Some(mut workers) = workers {
        info!("System ready. Press Ctrl+C to shutdown");

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown signal received. Draining in-flight deliveries...");
            }
            exit = workers.next_exit() => {
                warn!(?exit, "Worker stopped unexpectedly, shutting down the pool");
            }
        }

        match workers.shutdown_and_join(config.shutdown_timeout()).await {
            Ok(stats) => info!(
                processed = stats.processed,
                failed = stats.failed,
                requeued = stats.requeued,
                rejected = stats.rejected,
                "Workers drained"
            ),
            Err(e) => error!(error = %e, "Worker pool did not shut down cleanly"),
        }
    }

    close_connection(connection.as_ref()).await;
    db.close().await;
    info!("Shutdown complete.");
    Ok(())
}

async fn start_workers(
    config: &Config,
    connection: Arc<dyn QueueConnection>,
    catalog: Arc<SqliteCatalog>,
) -> Result<WorkerPoolHandle> {
    let fetcher = HttpImageFetcher::new(config.fetch_limits())?;
    let transcoder = HttpImageTranscoder::new(fetcher, config.quality()?);
    let sink = FsResultSink::new(&config.sink.output_dir)
        .await
        .context("Result sink initialization failed")?;
    info!(output_dir = %config.sink.output_dir.display(), "Result sink ready");

    let ctx = PipelineContext {
        transcoder: Arc::new(transcoder),
        sink: Arc::new(sink),
        ledger: catalog,
        time_provider: Arc::new(SystemTimeProvider),
        id_provider: Arc::new(UuidProvider),
        stats: Arc::new(WorkerStats::new()),
    };

    info!(
        pool_size = config.worker.pool_size,
        ack_mode = ?config.worker.ack_mode,
        "Starting workers..."
    );
    Ok(WorkerPool::spawn(
        config.worker.pool_size,
        config.queue_spec(),
        config.worker.ack_mode,
        connection,
        ctx,
    ))
}

/// Run the producer once.
///
/// On failure the worker pool, if any, is drained before the error is
/// returned. The caller still owns the connection.
async fn produce_or_stop(
    config: &Config,
    connection: &dyn QueueConnection,
    source: Arc<dyn WorkSource>,
    workers: Option<WorkerPoolHandle>,
) -> Result<Option<WorkerPoolHandle>> {
    match produce(config, connection, source).await {
        Ok(report) => {
            info!(
                discovered = report.discovered,
                published = report.published,
                "Producer finished"
            );
            Ok(workers)
        }
        Err(e) => {
            error!(error = ?e, "Producer failed, stopping");
            if let Some(workers) = workers {
                if let Err(stop_err) = workers.shutdown_and_join(config.shutdown_timeout()).await {
                    warn!(error = %stop_err, "Worker pool did not shut down cleanly");
                }
            }
            Err(e)
        }
    }
}

async fn produce(
    config: &Config,
    connection: &dyn QueueConnection,
    source: Arc<dyn WorkSource>,
) -> Result<ProducerReport> {
    let channel = connection
        .open_channel()
        .await
        .context("Failed to open producer channel")?;

    let producer = Producer::new(source, channel.clone(), config.queue_spec())
        .with_mode(config.producer.mode)
        .with_wire_format(config.producer.wire_format);
    let report = producer.run().await.context("Producer run failed");

    if let Err(e) = channel.close().await {
        warn!(error = %e, "Failed to close producer channel");
    }
    report
}

async fn close_connection(connection: &dyn QueueConnection) {
    if let Err(e) = connection.close().await {
        warn!(error = %e, "Failed to close broker connection");
    }
}
