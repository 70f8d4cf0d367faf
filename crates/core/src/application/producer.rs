// Producer - Catalog rows to queue messages

use crate::domain::{QueueSpec, WireFormat};
use crate::error::Result;
use crate::port::{OutgoingMessage, QueueChannel, WorkFilter, WorkSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which catalog rows a producer run publishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerMode {
    /// Skip image references that already have a recorded result.
    /// Re-running the producer after a completed run publishes nothing.
    #[default]
    PendingOnly,
    /// Publish every row with an image reference
    RepublishAll,
}

impl ProducerMode {
    fn filter(self) -> WorkFilter {
        match self {
            ProducerMode::PendingOnly => WorkFilter::pending_only(),
            ProducerMode::RepublishAll => WorkFilter::all(),
        }
    }
}

/// Result of one producer run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    /// Work items returned by the catalog
    pub discovered: usize,
    /// Work items confirmed by the broker
    pub published: usize,
}

pub struct Producer {
    source: Arc<dyn WorkSource>,
    channel: Arc<dyn QueueChannel>,
    queue: QueueSpec,
    mode: ProducerMode,
    wire_format: WireFormat,
}

impl Producer {
    pub fn new(source: Arc<dyn WorkSource>, channel: Arc<dyn QueueChannel>, queue: QueueSpec) -> Self {
        Self {
            source,
            channel,
            queue,
            mode: ProducerMode::default(),
            wire_format: WireFormat::default(),
        }
    }

    pub fn with_mode(mut self, mode: ProducerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }

    /// Query the catalog and publish one persistent message per work item,
    /// in catalog order.
    ///
    /// The queue is declared first so messages are never routed to a queue
    /// that does not exist yet.
    ///
    /// # Errors
    /// - AppError::Query if the catalog cannot be read (nothing is published)
    /// - AppError::QueueDeclaration if the queue exists with other parameters
    /// - AppError::Publish on the first refused publish; remaining items
    ///   are not published
    pub async fn run(&self) -> Result<ProducerReport> {
        self.channel.declare_queue(&self.queue).await?;

        let items = self.source.query(self.mode.filter()).await?;
        let mut report = ProducerReport {
            discovered: items.len(),
            published: 0,
        };

        info!(
            queue = %self.queue.name,
            mode = ?self.mode,
            items = items.len(),
            "Publishing work items"
        );

        for item in &items {
            let body = self.wire_format.encode(item)?;
            let message = OutgoingMessage::persistent(body, self.wire_format.content_type());

            if let Err(e) = self.channel.publish(&self.queue.name, message).await {
                warn!(
                    product_id = item.id,
                    image_url = %item.image_url,
                    published = report.published,
                    remaining = items.len() - report.published,
                    error = %e,
                    "Publish failed, aborting producer run"
                );
                return Err(e);
            }

            report.published += 1;
            debug!(product_id = item.id, image_url = %item.image_url, "Work item published");
        }

        info!(
            queue = %self.queue.name,
            discovered = report.discovered,
            published = report.published,
            "Producer run complete"
        );
        Ok(report)
    }
}
