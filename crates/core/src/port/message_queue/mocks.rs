// In-memory broker for tests
//
// Models the parts of AMQP the pipeline relies on: durable vs transient
// queues, persistent vs transient messages, auto and manual ack, requeue on
// nack or channel close, and broker restart.

use super::*;
use crate::error::AppError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    content_type: String,
    persistent: bool,
    redelivered: bool,
}

struct Unacked {
    channel_id: u64,
    message: StoredMessage,
}

struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, Unacked>,
}

impl QueueState {
    /// Put unacked messages matching `owned` back at the head, in tag order
    fn requeue_where(&mut self, owned: impl Fn(&Unacked) -> bool) -> usize {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| owned(u))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        for tag in tags.iter().rev() {
            if let Some(u) = self.unacked.remove(tag) {
                let mut message = u.message;
                message.redelivered = true;
                self.ready.push_front(message);
            }
        }
        tags.len()
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    next_tag: u64,
    next_channel: u64,
    epoch: u64,
    closed_channels: HashSet<u64>,
    connection_closed: bool,
    published: u64,
    rejected: u64,
    fail_publish_after: Option<u64>,
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-memory broker; also acts as the connection to itself
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Messages waiting for a consumer
    pub fn message_count(&self, queue: &str) -> usize {
        let state = self.shared.state.lock().unwrap();
        state.queues.get(queue).map(|q| q.ready.len()).unwrap_or(0)
    }

    /// Messages handed out under manual ack and not yet settled
    pub fn unacked_count(&self, queue: &str) -> usize {
        let state = self.shared.state.lock().unwrap();
        state.queues.get(queue).map(|q| q.unacked.len()).unwrap_or(0)
    }

    /// Total accepted publishes
    pub fn published_count(&self) -> u64 {
        self.shared.state.lock().unwrap().published
    }

    /// Deliveries nacked without requeue
    pub fn rejected_count(&self) -> u64 {
        self.shared.state.lock().unwrap().rejected
    }

    /// Refuse every publish once `n` messages have been accepted
    pub fn fail_publish_after(&self, n: u64) {
        self.shared.state.lock().unwrap().fail_publish_after = Some(n);
    }

    /// Simulate a broker restart.
    ///
    /// Non-durable queues and transient messages are lost; unacked messages
    /// go back to the head of their queue flagged as redelivered; every open
    /// channel and subscription is closed.
    pub fn restart(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.epoch += 1;
            state.closed_channels.clear();
            state.queues.retain(|_, q| q.spec.durable);
            for queue in state.queues.values_mut() {
                queue.requeue_where(|_| true);
                queue.ready.retain(|m| m.persistent);
            }
        }
        self.shared.notify.notify_waiters();
    }
}

#[async_trait]
impl QueueConnection for InMemoryBroker {
    async fn open_channel(&self) -> Result<Arc<dyn QueueChannel>> {
        let mut state = self.shared.state.lock().unwrap();
        if state.connection_closed {
            return Err(AppError::Channel("connection is closed".to_string()));
        }
        state.next_channel += 1;
        Ok(Arc::new(MemoryChannel {
            shared: Arc::clone(&self.shared),
            id: state.next_channel,
            epoch: state.epoch,
        }))
    }

    async fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.connection_closed = true;
            for queue in state.queues.values_mut() {
                queue.requeue_where(|_| true);
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct MemoryChannel {
    shared: Arc<Shared>,
    id: u64,
    epoch: u64,
}

fn channel_is_open(state: &BrokerState, id: u64, epoch: u64) -> bool {
    !state.connection_closed && state.epoch == epoch && !state.closed_channels.contains(&id)
}

impl MemoryChannel {
    fn ensure_open(&self, state: &BrokerState) -> Result<()> {
        if channel_is_open(state, self.id, self.epoch) {
            Ok(())
        } else {
            Err(AppError::Channel(format!("channel {} is closed", self.id)))
        }
    }
}

#[async_trait]
impl QueueChannel for MemoryChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        self.ensure_open(&state)?;

        if let Some(existing) = state.queues.get(&spec.name) {
            if existing.spec.is_compatible_with(spec) {
                return Ok(());
            }
            return Err(AppError::QueueDeclaration(format!(
                "inequivalent arguments for queue '{}'",
                spec.name
            )));
        }

        state.queues.insert(
            spec.name.clone(),
            QueueState {
                spec: spec.clone(),
                ready: VecDeque::new(),
                unacked: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            self.ensure_open(&state)?;

            if let Some(limit) = state.fail_publish_after {
                if state.published >= limit {
                    return Err(AppError::Publish("broker refused message".to_string()));
                }
            }

            let target = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| AppError::Publish(format!("no route to queue '{}'", queue)))?;
            target.ready.push_back(StoredMessage {
                body: message.body,
                content_type: message.content_type,
                persistent: message.persistent,
                redelivered: false,
            });
            state.published += 1;
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<Box<dyn Subscription>> {
        let state = self.shared.state.lock().unwrap();
        self.ensure_open(&state)?;

        if !state.queues.contains_key(queue) {
            return Err(AppError::Channel(format!("no queue '{}'", queue)));
        }

        Ok(Box::new(MemorySubscription {
            shared: Arc::clone(&self.shared),
            channel_id: self.id,
            epoch: self.epoch,
            queue: queue.to_string(),
            auto_ack: options.ack_mode == AckMode::Auto,
        }))
    }

    async fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.epoch == self.epoch {
                state.closed_channels.insert(self.id);
                let id = self.id;
                for queue in state.queues.values_mut() {
                    queue.requeue_where(|u| u.channel_id == id);
                }
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    channel_id: u64,
    epoch: u64,
    queue: String,
    auto_ack: bool,
}

impl MemorySubscription {
    fn take(&self, state: &mut BrokerState) -> Option<Delivery> {
        let message = state.queues.get_mut(&self.queue)?.ready.pop_front()?;
        state.next_tag += 1;
        let tag = state.next_tag;

        let acker: Option<Box<dyn DeliveryAcker>> = if self.auto_ack {
            None
        } else {
            state.queues.get_mut(&self.queue)?.unacked.insert(
                tag,
                Unacked {
                    channel_id: self.channel_id,
                    message: message.clone(),
                },
            );
            Some(Box::new(MemoryAcker {
                shared: Arc::clone(&self.shared),
                queue: self.queue.clone(),
                tag,
                settled: AtomicBool::new(false),
            }))
        };

        Some(Delivery::new(
            tag,
            message.redelivered,
            Some(message.content_type),
            message.body,
            acker,
        ))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        loop {
            // Register interest before checking so a publish in between is not missed
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock().unwrap();
                if !channel_is_open(&state, self.channel_id, self.epoch)
                    || !state.queues.contains_key(&self.queue)
                {
                    return None;
                }
                if let Some(delivery) = self.take(&mut state) {
                    return Some(Ok(delivery));
                }
            }

            notified.await;
        }
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    tag: u64,
    settled: AtomicBool,
}

impl MemoryAcker {
    fn settle(&self, requeue: Option<bool>) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(AppError::Channel(format!(
                "delivery tag {} already settled",
                self.tag
            )));
        }

        let mut guard = self.shared.state.lock().unwrap();
        let state = &mut *guard;
        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| AppError::Channel(format!("unknown queue '{}'", self.queue)))?;
        let unacked = queue
            .unacked
            .remove(&self.tag)
            .ok_or_else(|| AppError::Channel(format!("unknown delivery tag {}", self.tag)))?;

        match requeue {
            None => {}
            Some(true) => {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.ready.push_front(message);
            }
            Some(false) => state.rejected += 1,
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryAcker for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle(None)
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.settle(Some(requeue))?;
        if requeue {
            self.shared.notify.notify_waiters();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const QUEUE: &str = "image_processing_queue";

    fn text(body: &str) -> OutgoingMessage {
        OutgoingMessage::persistent(body.as_bytes().to_vec(), "text/plain")
    }

    fn manual() -> ConsumeOptions {
        ConsumeOptions {
            consumer_tag: "test".to_string(),
            ack_mode: AckMode::Manual,
        }
    }

    async fn declared(broker: &InMemoryBroker) -> Arc<dyn QueueChannel> {
        let channel = broker.open_channel().await.unwrap();
        channel
            .declare_queue(&QueueSpec::durable(QUEUE))
            .await
            .unwrap();
        channel
    }

    #[tokio::test]
    async fn test_declare_is_idempotent_but_checks_flags() {
        let broker = InMemoryBroker::new();
        let channel = declared(&broker).await;
        assert!(channel.declare_queue(&QueueSpec::durable(QUEUE)).await.is_ok());

        let mut transient = QueueSpec::durable(QUEUE);
        transient.durable = false;
        let err = channel.declare_queue(&transient).await.unwrap_err();
        assert!(matches!(err, AppError::QueueDeclaration(_)));
    }

    #[tokio::test]
    async fn test_persistent_messages_survive_restart() {
        let broker = InMemoryBroker::new();
        let channel = declared(&broker).await;

        channel.publish(QUEUE, text("kept")).await.unwrap();
        let mut lost = text("lost");
        lost.persistent = false;
        channel.publish(QUEUE, lost).await.unwrap();
        assert_eq!(broker.message_count(QUEUE), 2);

        broker.restart();
        assert_eq!(broker.message_count(QUEUE), 1);

        // Old channel is gone, a new one works
        assert!(channel.publish(QUEUE, text("x")).await.is_err());
        let channel = broker.open_channel().await.unwrap();
        let mut sub = channel.consume(QUEUE, manual()).await.unwrap();
        let delivery = sub.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"kept");
    }

    #[tokio::test]
    async fn test_nack_requeue_redelivers() {
        let broker = InMemoryBroker::new();
        let channel = declared(&broker).await;
        channel.publish(QUEUE, text("a")).await.unwrap();

        let mut sub = channel.consume(QUEUE, manual()).await.unwrap();
        let first = sub.next_delivery().await.unwrap().unwrap();
        assert!(!first.redelivered);
        assert_eq!(broker.unacked_count(QUEUE), 1);
        first.nack(true).await.unwrap();

        let second = sub.next_delivery().await.unwrap().unwrap();
        assert!(second.redelivered);
        second.ack().await.unwrap();
        assert_eq!(broker.unacked_count(QUEUE), 0);
        assert_eq!(broker.message_count(QUEUE), 0);

        // Double settle is an error
        assert!(second.ack().await.is_err());
    }

    #[tokio::test]
    async fn test_auto_ack_forgets_immediately() {
        let broker = InMemoryBroker::new();
        let channel = declared(&broker).await;
        channel.publish(QUEUE, text("a")).await.unwrap();

        let mut sub = channel
            .consume(
                QUEUE,
                ConsumeOptions {
                    consumer_tag: "auto".to_string(),
                    ack_mode: AckMode::Auto,
                },
            )
            .await
            .unwrap();
        let delivery = sub.next_delivery().await.unwrap().unwrap();
        assert!(delivery.is_auto_acked());
        assert_eq!(broker.unacked_count(QUEUE), 0);

        // Nothing comes back after a restart: the message is gone
        broker.restart();
        assert_eq!(broker.message_count(QUEUE), 0);
    }

    #[tokio::test]
    async fn test_channel_close_requeues_and_ends_subscription() {
        let broker = InMemoryBroker::new();
        let channel = declared(&broker).await;
        channel.publish(QUEUE, text("a")).await.unwrap();

        let mut sub = channel.consume(QUEUE, manual()).await.unwrap();
        let _in_flight = sub.next_delivery().await.unwrap().unwrap();

        channel.close().await.unwrap();
        assert!(sub.next_delivery().await.is_none());
        assert_eq!(broker.message_count(QUEUE), 1);
    }

    #[tokio::test]
    async fn test_waiting_subscription_wakes_on_publish() {
        let broker = InMemoryBroker::new();
        let channel = declared(&broker).await;
        let mut sub = channel.consume(QUEUE, manual()).await.unwrap();

        let publisher = broker.open_channel().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(QUEUE, text("late")).await.unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.next_delivery())
            .await
            .expect("subscription should wake")
            .unwrap()
            .unwrap();
        assert_eq!(delivery.body, b"late");
    }

    #[tokio::test]
    async fn test_publish_failure_injection() {
        let broker = InMemoryBroker::new();
        let channel = declared(&broker).await;
        broker.fail_publish_after(1);

        assert!(channel.publish(QUEUE, text("a")).await.is_ok());
        let err = channel.publish(QUEUE, text("b")).await.unwrap_err();
        assert!(matches!(err, AppError::Publish(_)));
    }
}
