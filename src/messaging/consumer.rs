//! # Task Event Consumer
//!
//! Long-running subscriber for the task topic exchange.
//!
//! ```text
//!            subscribe ok
//! Disconnected ──────────────▶ Subscribed
//!     ▲    │ failure: log,          │ stream ended / errored
//!     │    └─ backoff, retry        │
//!     └──────── backoff ────────────┘
//! ```
//!
//! Subscribing declares the exchange (same as the publisher), a durable queue,
//! binds it with `task.*` and starts a manual-ack consumer. Failed subscribes
//! and lost subscriptions are retried forever with bounded exponential
//! backoff. The failure streak only resets once a subscription delivered a
//! message or stayed up for the initial delay. Only the cancellation token
//! stops the loop; a subscribe in flight at cancellation is allowed to finish
//! so its channel gets closed.
//!
//! Each delivery is handled on its own: parse into a [`TaskWireEvent`], run the
//! [`WireEventHandler`], then ack that single message. A message that fails to
//! parse or whose handler fails is nacked without requeue and dropped, so a
//! poison message cannot loop forever. Message failures never change the
//! connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::errors::{MessagingResult, ProcessingError};
use super::transport::{BrokerChannel, BrokerConnector, DeliveryStream, InboundDelivery};
use crate::config::ConsumerSettings;
use crate::events::TaskWireEvent;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Work done for each successfully parsed message before it is acked
#[async_trait]
pub trait WireEventHandler: Send + Sync + 'static {
    async fn handle(&self, event: &TaskWireEvent) -> Result<(), ProcessingError>;
}

/// Default handler: structured log line per event
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingWireEventHandler;

#[async_trait]
impl WireEventHandler for LoggingWireEventHandler {
    async fn handle(&self, event: &TaskWireEvent) -> Result<(), ProcessingError> {
        info!(
            action = %event.action,
            task_id = %event.id,
            status = %event.status,
            "TaskEvent received"
        );
        Ok(())
    }
}

/// Exponential backoff between failed subscribe attempts, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectBackoff {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Names used when subscribing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub exchange: String,
    pub queue: String,
    pub binding_key: String,
    pub consumer_tag: String,
}

impl Subscription {
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            binding_key: "task.*".to_string(),
            consumer_tag: "task-events-consumer".to_string(),
        }
    }
}

enum SubscriptionEnd {
    Cancelled,
    Lost { delivered: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Subscribed,
}

/// Point-in-time counters for health checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub subscriptions: u64,
    pub acked: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct ConsumerCounters {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    subscriptions: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
}

pub struct TaskEventConsumer {
    connector: Arc<dyn BrokerConnector>,
    subscription: Subscription,
    handler: Arc<dyn WireEventHandler>,
    backoff: ReconnectBackoff,
    counters: ConsumerCounters,
    state: watch::Sender<ConsumerState>,
}

impl std::fmt::Debug for TaskEventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEventConsumer")
            .field("provider", &self.connector.provider_name())
            .field("subscription", &self.subscription)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl TaskEventConsumer {
    pub fn new(connector: Arc<dyn BrokerConnector>, subscription: Subscription) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            connector,
            subscription,
            handler: Arc::new(LoggingWireEventHandler),
            backoff: ReconnectBackoff::default(),
            counters: ConsumerCounters::default(),
            state,
        }
    }

    pub fn from_settings(connector: Arc<dyn BrokerConnector>, settings: &ConsumerSettings) -> Self {
        let subscription = Subscription {
            exchange: settings.broker.exchange.clone(),
            queue: settings.queue.clone(),
            binding_key: settings.binding_key.clone(),
            consumer_tag: settings.consumer_tag.clone(),
        };
        Self::new(connector, subscription).with_backoff(ReconnectBackoff {
            initial: settings.reconnect_initial_delay,
            max: settings.reconnect_max_delay,
        })
    }

    pub fn with_handler(mut self, handler: Arc<dyn WireEventHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn current_state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            connect_attempts: self.counters.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.counters.connect_failures.load(Ordering::Relaxed),
            subscriptions: self.counters.subscriptions.load(Ordering::Relaxed),
            acked: self.counters.acked.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Run until `cancel` fires; broker failures are retried, never returned
    pub async fn run(&self, cancel: CancellationToken) -> MessagingResult<()> {
        let mut attempt: u32 = 0;

        loop {
            let subscribe = self.subscribe();
            tokio::pin!(subscribe);
            let subscribed = tokio::select! {
                result = &mut subscribe => result,
                _ = cancel.cancelled() => {
                    // Let a half-open subscription finish so its channel can be closed
                    if let Ok(Ok((channel, _))) = tokio::time::timeout(CLOSE_TIMEOUT, &mut subscribe).await {
                        close_quietly(channel.as_ref()).await;
                    }
                    break;
                }
            };

            let (channel, deliveries) = match subscribed {
                Ok(subscribed) => subscribed,
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    self.counters.connect_failures.fetch_add(1, Ordering::Relaxed);
                    let delay = self.backoff.delay_for(attempt);
                    error!(
                        error = %e,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to connect to broker"
                    );
                    if self.wait_before_retry(delay, &cancel).await {
                        continue;
                    }
                    break;
                }
            };

            self.counters.subscriptions.fetch_add(1, Ordering::Relaxed);
            self.state.send_replace(ConsumerState::Subscribed);
            info!(
                queue = %self.subscription.queue,
                exchange = %self.subscription.exchange,
                binding_key = %self.subscription.binding_key,
                "Listening on queue"
            );

            let started = Instant::now();
            let outcome = self.consume(channel.as_ref(), deliveries, &cancel).await;

            self.state.send_replace(ConsumerState::Disconnected);
            close_quietly(channel.as_ref()).await;

            let delivered = match outcome {
                SubscriptionEnd::Cancelled => break,
                SubscriptionEnd::Lost { delivered } => delivered,
            };

            // Only a subscription that did real work clears the failure streak
            if delivered || started.elapsed() >= self.backoff.initial {
                attempt = 0;
            }
            attempt = attempt.saturating_add(1);
            let delay = self.backoff.delay_for(attempt);
            warn!(
                queue = %self.subscription.queue,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                "Subscription lost; reconnecting"
            );
            if !self.wait_before_retry(delay, &cancel).await {
                break;
            }
        }

        self.state.send_replace(ConsumerState::Disconnected);
        info!(queue = %self.subscription.queue, "Consumer stopped");
        Ok(())
    }

    /// Sleep for `delay`; false when cancelled first
    async fn wait_before_retry(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn consume(
        &self,
        channel: &dyn BrokerChannel,
        mut deliveries: DeliveryStream,
        cancel: &CancellationToken,
    ) -> SubscriptionEnd {
        let mut delivered = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SubscriptionEnd::Cancelled,
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        delivered = true;
                        self.handle_delivery(channel, delivery).await;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Delivery stream failed");
                        return SubscriptionEnd::Lost { delivered };
                    }
                    None => {
                        warn!("Delivery stream ended");
                        return SubscriptionEnd::Lost { delivered };
                    }
                },
            }
        }
    }

    async fn subscribe(&self) -> MessagingResult<(Arc<dyn BrokerChannel>, DeliveryStream)> {
        self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let channel = self.connector.connect().await?;

        match self.declare_and_consume(channel.as_ref()).await {
            Ok(deliveries) => Ok((channel, deliveries)),
            Err(e) => {
                close_quietly(channel.as_ref()).await;
                Err(e)
            }
        }
    }

    async fn declare_and_consume(&self, channel: &dyn BrokerChannel) -> MessagingResult<DeliveryStream> {
        let sub = &self.subscription;
        channel.declare_topic_exchange(&sub.exchange).await?;
        channel.declare_durable_queue(&sub.queue).await?;
        channel
            .bind_queue(&sub.queue, &sub.exchange, &sub.binding_key)
            .await?;
        channel.consume(&sub.queue, &sub.consumer_tag).await
    }

    async fn handle_delivery(&self, channel: &dyn BrokerChannel, delivery: InboundDelivery) {
        let delivery_tag = delivery.delivery_tag;

        match self.process(&delivery).await {
            Ok(event) => {
                debug!(delivery_tag, task_id = %event.id, "Acknowledging message");
                match channel.ack(delivery_tag).await {
                    Ok(()) => {
                        self.counters.acked.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!(delivery_tag, error = %e, "Ack failed"),
                }
            }
            Err(e) => {
                error!(
                    delivery_tag,
                    routing_key = %delivery.routing_key,
                    error = %e,
                    "Couldn't handle message; rejecting without requeue"
                );
                match channel.nack(delivery_tag, false).await {
                    Ok(()) => {
                        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!(delivery_tag, error = %e, "Nack failed"),
                }
            }
        }
    }

    async fn process(&self, delivery: &InboundDelivery) -> Result<TaskWireEvent, ProcessingError> {
        let event = TaskWireEvent::from_bytes(&delivery.data)?;
        self.handler.handle(&event).await?;
        Ok(event)
    }
}

async fn close_quietly(channel: &dyn BrokerChannel) {
    match tokio::time::timeout(CLOSE_TIMEOUT, channel.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Channel close failed"),
        Err(_) => debug!("Channel close timed out"),
    }
}
