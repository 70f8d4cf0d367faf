// Message Queue Port
// One Queue Client abstraction shared by producer and consumers

pub mod mocks;

use crate::domain::QueueSpec;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Message handed to the broker by a publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub content_type: String,
    /// Delivery mode 2: survives broker restart on a durable queue
    pub persistent: bool,
}

impl OutgoingMessage {
    pub fn persistent(body: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            body,
            content_type: content_type.into(),
            persistent: true,
        }
    }
}

/// Acknowledgement mode of a subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Ack after a successful persist, nack on failure
    #[default]
    Manual,
    /// Broker forgets the message as soon as it is handed out.
    /// A crash or processing error loses the message.
    Auto,
}

#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub consumer_tag: String,
    pub ack_mode: AckMode,
}

/// Settles one delivery with the broker
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// Broker envelope around a message body. Tag and redelivered flag are
/// assigned by the broker.
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    acker: Option<Box<dyn DeliveryAcker>>,
}

impl Delivery {
    /// `acker` is `None` for auto-acked deliveries
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        content_type: Option<String>,
        body: Vec<u8>,
        acker: Option<Box<dyn DeliveryAcker>>,
    ) -> Self {
        Self {
            delivery_tag,
            redelivered,
            content_type,
            body,
            acker,
        }
    }

    pub fn is_auto_acked(&self) -> bool {
        self.acker.is_none()
    }

    /// No-op under auto-ack
    pub async fn ack(&self) -> Result<()> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// No-op under auto-ack
    pub async fn nack(&self, requeue: bool) -> Result<()> {
        match &self.acker {
            Some(acker) => acker.nack(requeue).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("content_type", &self.content_type)
            .field("body_len", &self.body.len())
            .field("auto_acked", &self.is_auto_acked())
            .finish()
    }
}

/// Unbounded, non-restartable stream of deliveries
#[async_trait]
pub trait Subscription: Send {
    /// Next delivery; `None` once the channel or connection is closed.
    ///
    /// Cancel-safe: dropping the future never loses a delivery.
    async fn next_delivery(&mut self) -> Option<Result<Delivery>>;
}

/// Logical channel multiplexed over a connection. One per task.
#[async_trait]
pub trait QueueChannel: Send + Sync {
    /// Idempotent declaration
    ///
    /// # Errors
    /// - AppError::QueueDeclaration if the queue exists with other parameters
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()>;

    /// Publish via the default exchange with routing key = `queue`
    ///
    /// # Errors
    /// - AppError::Publish if the broker refuses or does not confirm
    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()>;

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<Box<dyn Subscription>>;

    async fn close(&self) -> Result<()>;
}

/// Long-lived transport connection to the broker
#[async_trait]
pub trait QueueConnection: Send + Sync {
    /// # Errors
    /// - AppError::Channel if the channel cannot be opened
    async fn open_channel(&self) -> Result<Arc<dyn QueueChannel>>;

    async fn close(&self) -> Result<()>;
}
