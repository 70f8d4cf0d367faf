// AMQP channel, subscription and acker

use crate::error::map_lapin_error;
use async_trait::async_trait;
use futures::StreamExt;
use imgpipe_core::domain::QueueSpec;
use imgpipe_core::error::{AppError, Result};
use imgpipe_core::port::{
    AckMode, ConsumeOptions, Delivery, DeliveryAcker, OutgoingMessage, QueueChannel, Subscription,
};
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, Consumer};
use tracing::{debug, info};

const DELIVERY_MODE_TRANSIENT: u8 = 1;
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Channel with publisher confirms enabled and the prefetch window applied
pub struct AmqpChannel {
    channel: Channel,
}

impl AmqpChannel {
    pub(crate) async fn open(connection: &Connection, prefetch: u16) -> Result<Self> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| map_lapin_error(e, AppError::Channel))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| map_lapin_error(e, AppError::Channel))?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| map_lapin_error(e, AppError::Channel))?;

        debug!(channel_id = channel.id(), prefetch, "Channel opened");
        Ok(Self { channel })
    }
}

pub(crate) fn declare_options(spec: &QueueSpec) -> QueueDeclareOptions {
    QueueDeclareOptions {
        passive: false,
        durable: spec.durable,
        exclusive: spec.exclusive,
        auto_delete: spec.auto_delete,
        nowait: false,
    }
}

pub(crate) fn message_properties(message: &OutgoingMessage) -> BasicProperties {
    let delivery_mode = if message.persistent {
        DELIVERY_MODE_PERSISTENT
    } else {
        DELIVERY_MODE_TRANSIENT
    };
    BasicProperties::default()
        .with_content_type(ShortString::from(message.content_type.clone()))
        .with_delivery_mode(delivery_mode)
}

pub(crate) fn consume_options(options: &ConsumeOptions) -> BasicConsumeOptions {
    BasicConsumeOptions {
        no_ack: options.ack_mode == AckMode::Auto,
        ..BasicConsumeOptions::default()
    }
}

#[async_trait]
impl QueueChannel for AmqpChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        let queue = self
            .channel
            .queue_declare(&spec.name, declare_options(spec), FieldTable::default())
            .await
            .map_err(|e| map_lapin_error(e, AppError::QueueDeclaration))?;

        debug!(
            queue = %spec.name,
            durable = spec.durable,
            messages = queue.message_count(),
            consumers = queue.consumer_count(),
            "Queue declared"
        );
        Ok(())
    }

    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()> {
        let properties = message_properties(&message);
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| map_lapin_error(e, AppError::Publish))?;

        let confirmation = confirm
            .await
            .map_err(|e| map_lapin_error(e, AppError::Publish))?;

        if confirmation.is_nack() {
            return Err(AppError::Publish(format!(
                "Broker did not confirm message for queue '{}'",
                queue
            )));
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<Box<dyn Subscription>> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &options.consumer_tag,
                consume_options(&options),
                FieldTable::default(),
            )
            .await
            .map_err(|e| map_lapin_error(e, AppError::Channel))?;

        info!(
            queue,
            consumer_tag = %options.consumer_tag,
            ack_mode = ?options.ack_mode,
            "Consumer registered"
        );
        Ok(Box::new(AmqpSubscription {
            consumer,
            auto_ack: options.ack_mode == AckMode::Auto,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.channel
            .close(200, "OK")
            .await
            .map_err(|e| map_lapin_error(e, AppError::Channel))
    }
}

struct AmqpSubscription {
    consumer: Consumer,
    auto_ack: bool,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        match self.consumer.next().await? {
            Ok(delivery) => Some(Ok(into_delivery(delivery, self.auto_ack))),
            Err(e) => Some(Err(map_lapin_error(e, AppError::Channel))),
        }
    }
}

fn into_delivery(delivery: lapin::message::Delivery, auto_ack: bool) -> Delivery {
    let content_type = delivery
        .properties
        .content_type()
        .as_ref()
        .map(|ct| ct.as_str().to_string());

    let acker: Option<Box<dyn DeliveryAcker>> = if auto_ack {
        None
    } else {
        Some(Box::new(LapinAcker {
            acker: delivery.acker,
        }))
    };

    Delivery::new(
        delivery.delivery_tag,
        delivery.redelivered,
        content_type,
        delivery.data,
        acker,
    )
}

struct LapinAcker {
    acker: Acker,
}

#[async_trait]
impl DeliveryAcker for LapinAcker {
    async fn ack(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| map_lapin_error(e, AppError::Channel))
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map_err(|e| map_lapin_error(e, AppError::Channel))
    }
}
