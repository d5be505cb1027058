//! # In-Memory Broker
//!
//! Topic-exchange broker kept entirely in process, for testing and local
//! development. Implements [`BrokerConnector`] and [`BrokerChannel`] with the
//! same observable semantics the publisher and consumer rely on:
//!
//! - **Topic routing**: `*` matches one word, `#` matches zero or more
//! - **Mandatory publish**: no matching binding returns `Unroutable`
//! - **Manual ack**: deliveries stay unacked until `ack`/`nack`
//! - **Failure injection**: refuse the next N connects, fail or stall queue
//!   binds, delay connects, or kill every open channel to simulate a broker
//!   restart
//!
//! Inspection helpers (`published`, `acked`, `exchange_declarations`, ...)
//! let tests assert on what reached the broker.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};

use super::errors::{MessagingError, MessagingResult};
use super::transport::{BrokerChannel, BrokerConnector, DeliveryStream, InboundDelivery, OutboundMessage};

/// A message as it reached the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: String,
    pub mandatory: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Binding {
    queue: String,
    exchange: String,
    pattern: String,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<InboundDelivery>,
    consumer: Option<mpsc::UnboundedSender<MessagingResult<InboundDelivery>>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    published: Vec<PublishedMessage>,
    unacked: HashMap<u64, (String, InboundDelivery)>,
    acked: Vec<u64>,
    nacked: Vec<(u64, bool)>,
    next_delivery_tag: u64,
    open_channels: Vec<Arc<AtomicBool>>,
}

impl BrokerState {
    fn route(&mut self, exchange: &str, routing_key: &str, payload: &[u8]) -> usize {
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        for queue in &targets {
            self.next_delivery_tag += 1;
            let delivery = InboundDelivery {
                delivery_tag: self.next_delivery_tag,
                routing_key: routing_key.to_string(),
                redelivered: false,
                data: payload.to_vec(),
            };
            self.enqueue(queue, delivery);
        }

        targets.len()
    }

    fn enqueue(&mut self, queue: &str, delivery: InboundDelivery) {
        let Some(state) = self.queues.get_mut(queue) else {
            return;
        };
        if let Some(consumer) = &state.consumer {
            self.unacked
                .insert(delivery.delivery_tag, (queue.to_string(), delivery.clone()));
            if consumer.send(Ok(delivery.clone())).is_ok() {
                return;
            }
            self.unacked.remove(&delivery.delivery_tag);
            state.consumer = None;
        }
        state.pending.push_back(delivery);
    }
}

#[derive(Debug, Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    connect_attempts: AtomicUsize,
    exchange_declarations: AtomicUsize,
    fail_next_connects: AtomicUsize,
    fail_next_binds: AtomicUsize,
    connect_delay_ms: AtomicUsize,
    bind_delay_ms: AtomicUsize,
}

/// Cheap to clone; clones share the same broker
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next_connects(&self, count: usize) {
        self.inner.fail_next_connects.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` queue binds on otherwise healthy channels
    pub fn fail_next_binds(&self, count: usize) {
        self.inner.fail_next_binds.store(count, Ordering::SeqCst);
    }

    /// Make every queue bind take at least `delay`
    pub fn set_bind_delay(&self, delay: Duration) {
        self.inner
            .bind_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Make every connection attempt take at least `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        self.inner
            .connect_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Close every open channel and end every consumer stream
    pub async fn drop_connections(&self) {
        let mut state = self.inner.state.lock().await;
        for closed in state.open_channels.drain(..) {
            closed.store(true, Ordering::SeqCst);
        }
        let mut requeue = Vec::new();
        for (tag, (queue, delivery)) in state.unacked.drain() {
            requeue.push((tag, queue, delivery));
        }
        requeue.sort_by_key(|(tag, _, _)| *tag);
        for queue in state.queues.values_mut() {
            queue.consumer = None;
        }
        for (_, queue, mut delivery) in requeue {
            delivery.redelivered = true;
            if let Some(q) = state.queues.get_mut(&queue) {
                q.pending.push_back(delivery);
            }
        }
    }

    /// Route a raw body through an exchange, bypassing any channel
    pub async fn inject(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> usize {
        let mut state = self.inner.state.lock().await;
        state.route(exchange, routing_key, payload)
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn exchange_declarations(&self) -> usize {
        self.inner.exchange_declarations.load(Ordering::SeqCst)
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.inner.state.lock().await.published.clone()
    }

    pub async fn acked(&self) -> Vec<u64> {
        self.inner.state.lock().await.acked.clone()
    }

    /// `(delivery_tag, requeue)` for every nack received
    pub async fn nacked(&self) -> Vec<(u64, bool)> {
        self.inner.state.lock().await.nacked.clone()
    }

    pub async fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    pub async fn has_exchange(&self, exchange: &str) -> bool {
        self.inner.state.lock().await.exchanges.contains(exchange)
    }

    pub async fn open_channels(&self) -> usize {
        self.inner
            .state
            .lock()
            .await
            .open_channels
            .iter()
            .filter(|c| !c.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self) -> MessagingResult<Arc<dyn BrokerChannel>> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.inner.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let refused = self
            .inner
            .fail_next_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(MessagingError::connection("in-memory broker refused connection"));
        }

        let closed = Arc::new(AtomicBool::new(false));
        self.inner
            .state
            .lock()
            .await
            .open_channels
            .push(closed.clone());

        Ok(Arc::new(InMemoryChannel {
            broker: self.inner.clone(),
            closed,
        }))
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[derive(Debug)]
pub struct InMemoryChannel {
    broker: Arc<BrokerInner>,
    closed: Arc<AtomicBool>,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> MessagingResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(MessagingError::channel_closed("in-memory channel is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_topic_exchange(&self, exchange: &str) -> MessagingResult<()> {
        self.ensure_open()?;
        self.broker
            .exchange_declarations
            .fetch_add(1, Ordering::SeqCst);
        self.broker
            .state
            .lock()
            .await
            .exchanges
            .insert(exchange.to_string());
        Ok(())
    }

    async fn declare_durable_queue(&self, queue: &str) -> MessagingResult<()> {
        self.ensure_open()?;
        self.broker
            .state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> MessagingResult<()> {
        self.ensure_open()?;
        let delay = self.broker.bind_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        let failed = self
            .broker
            .fail_next_binds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MessagingError::channel_operation(
                "queue_bind",
                "in-memory broker rejected bind",
            ));
        }
        let mut state = self.broker.state.lock().await;
        if !state.exchanges.contains(exchange) {
            return Err(MessagingError::channel_operation(
                "queue_bind",
                format!("NOT_FOUND - no exchange '{exchange}'"),
            ));
        }
        if !state.queues.contains_key(queue) {
            return Err(MessagingError::channel_operation(
                "queue_bind",
                format!("NOT_FOUND - no queue '{queue}'"),
            ));
        }
        let exists = state.bindings.iter().any(|b| {
            b.queue == queue && b.exchange == exchange && b.pattern == binding_key
        });
        if !exists {
            state.bindings.push(Binding {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                pattern: binding_key.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage<'_>) -> MessagingResult<()> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().await;
        if !state.exchanges.contains(message.exchange) {
            // RabbitMQ closes the channel on a publish to a missing exchange
            self.closed.store(true, Ordering::SeqCst);
            return Err(MessagingError::channel_closed(format!(
                "NOT_FOUND - no exchange '{}'",
                message.exchange
            )));
        }

        state.published.push(PublishedMessage {
            exchange: message.exchange.to_string(),
            routing_key: message.routing_key.to_string(),
            content_type: message.content_type.to_string(),
            mandatory: message.mandatory,
            payload: message.payload.to_vec(),
        });

        let routed = state.route(message.exchange, message.routing_key, message.payload);
        if routed == 0 && message.mandatory {
            return Err(MessagingError::unroutable(message.exchange, message.routing_key));
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> MessagingResult<DeliveryStream> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.broker.state.lock().await;
        let state = &mut *state;
        let Some(queue_state) = state.queues.get_mut(queue) else {
            return Err(MessagingError::channel_operation(
                "basic_consume",
                format!("NOT_FOUND - no queue '{queue}'"),
            ));
        };

        for delivery in queue_state.pending.drain(..) {
            state
                .unacked
                .insert(delivery.delivery_tag, (queue.to_string(), delivery.clone()));
            let _ = tx.send(Ok(delivery));
        }
        queue_state.consumer = Some(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().await;
        state.unacked.remove(&delivery_tag);
        state.acked.push(delivery_tag);
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> MessagingResult<()> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().await;
        state.nacked.push((delivery_tag, requeue));
        if let Some((queue, mut delivery)) = state.unacked.remove(&delivery_tag) {
            if requeue {
                delivery.redelivered = true;
                state.enqueue(&queue, delivery);
            }
        }
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` is zero or more words
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::transport::JSON_CONTENT_TYPE;

    fn message<'a>(routing_key: &'a str, payload: &'a [u8]) -> OutboundMessage<'a> {
        OutboundMessage {
            exchange: "tasks",
            routing_key,
            payload,
            content_type: JSON_CONTENT_TYPE,
            mandatory: true,
        }
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("task.*", "task.created"));
        assert!(!topic_matches("task.*", "task.created.v2"));
        assert!(!topic_matches("task.*", "project.created"));
        assert!(topic_matches("task.#", "task"));
        assert!(topic_matches("task.#", "task.created.v2"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("task.created", "task.created"));
    }

    #[tokio::test]
    async fn test_mandatory_publish_without_binding_is_unroutable() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.declare_topic_exchange("tasks").await.unwrap();

        let result = channel.publish(message("task.created", b"{}")).await;
        assert!(matches!(result, Err(MessagingError::Unroutable { .. })));
        assert_eq!(broker.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_to_missing_exchange_closes_channel() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();

        let result = channel.publish(message("task.created", b"{}")).await;
        assert!(matches!(result, Err(MessagingError::ChannelClosed { .. })));
        assert!(channel.declare_topic_exchange("tasks").await.is_err());
    }

    #[tokio::test]
    async fn test_consume_ack_and_nack() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.declare_topic_exchange("tasks").await.unwrap();
        channel.declare_durable_queue("q").await.unwrap();
        channel.bind_queue("q", "tasks", "task.*").await.unwrap();

        channel.publish(message("task.created", b"1")).await.unwrap();
        channel.publish(message("task.deleted", b"2")).await.unwrap();
        assert_eq!(broker.queue_depth("q").await, 2);

        let mut deliveries = channel.consume("q", "test").await.unwrap();
        let first = deliveries.next().await.unwrap().unwrap();
        let second = deliveries.next().await.unwrap().unwrap();
        assert_eq!(first.data, b"1");
        assert_eq!(second.routing_key, "task.deleted");

        channel.ack(first.delivery_tag).await.unwrap();
        channel.nack(second.delivery_tag, false).await.unwrap();

        assert_eq!(broker.acked().await, vec![first.delivery_tag]);
        assert_eq!(broker.nacked().await, vec![(second.delivery_tag, false)]);
        assert_eq!(broker.queue_depth("q").await, 0);
    }

    #[tokio::test]
    async fn test_drop_connections_ends_streams_and_requeues_unacked() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.declare_topic_exchange("tasks").await.unwrap();
        channel.declare_durable_queue("q").await.unwrap();
        channel.bind_queue("q", "tasks", "task.*").await.unwrap();
        let mut deliveries = channel.consume("q", "test").await.unwrap();
        channel.publish(message("task.created", b"1")).await.unwrap();
        deliveries.next().await.unwrap().unwrap();

        broker.drop_connections().await;

        assert!(deliveries.next().await.is_none());
        assert!(channel.ack(1).await.is_err());
        assert_eq!(broker.queue_depth("q").await, 1);
        assert_eq!(broker.open_channels().await, 0);
    }

    #[tokio::test]
    async fn test_fail_next_binds() {
        let broker = InMemoryBroker::new();
        broker.fail_next_binds(1);
        let channel = broker.connect().await.unwrap();
        channel.declare_topic_exchange("tasks").await.unwrap();
        channel.declare_durable_queue("q").await.unwrap();

        assert!(channel.bind_queue("q", "tasks", "task.*").await.is_err());
        assert!(channel.bind_queue("q", "tasks", "task.*").await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_next_connects() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(2);

        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connect_attempts(), 3);
    }
}
