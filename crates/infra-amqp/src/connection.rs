// Broker connection with bounded reconnect at startup

use crate::channel::AmqpChannel;
use crate::config::AmqpConfig;
use crate::error::{map_connect_error, map_lapin_error};
use async_trait::async_trait;
use imgpipe_core::application::BackoffPolicy;
use imgpipe_core::error::{AppError, Result};
use imgpipe_core::port::{QueueChannel, QueueConnection};
use lapin::{Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, info};

/// One long-lived AMQP connection; channels are multiplexed over it
pub struct AmqpConnection {
    connection: Connection,
    prefetch: u16,
}

impl AmqpConnection {
    /// Connect, retrying transient failures per `backoff`.
    ///
    /// # Errors
    /// - AppError::Config if the broker refuses the credentials or vhost
    /// - AppError::Connection once retries are exhausted
    pub async fn connect(config: &AmqpConfig, backoff: &BackoffPolicy) -> Result<Self> {
        let uri = config.uri();
        info!(
            uri = %config.redacted_uri(),
            max_retries = backoff.max_attempts(),
            "Connecting to broker"
        );

        let connection = backoff
            .retry("amqp_connect", |attempt| {
                let uri = uri.clone();
                async move {
                    debug!(attempt, "Opening AMQP connection");
                    Connection::connect(&uri, ConnectionProperties::default())
                        .await
                        .map_err(map_connect_error)
                }
            })
            .await?;

        info!(host = %config.host, port = config.port, "Connected to broker");
        Ok(Self {
            connection,
            prefetch: config.prefetch,
        })
    }
}

#[async_trait]
impl QueueConnection for AmqpConnection {
    async fn open_channel(&self) -> Result<Arc<dyn QueueChannel>> {
        let channel = AmqpChannel::open(&self.connection, self.prefetch).await?;
        Ok(Arc::new(channel))
    }

    async fn close(&self) -> Result<()> {
        self.connection
            .close(200, "imgpipe shutting down")
            .await
            .map_err(|e| map_lapin_error(e, AppError::Connection))?;
        info!("Broker connection closed");
        Ok(())
    }
}
