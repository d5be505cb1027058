//! # Broker Transport Traits
//!
//! Provider-agnostic seam between the publisher/consumer logic and the broker
//! client. [`super::amqp`] implements it over lapin; [`super::in_memory`]
//! implements it for tests and local development.
//!
//! Implementations of [`BrokerChannel`] must allow concurrent `publish` calls
//! from many tasks on the same channel.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::errors::MessagingResult;

/// Content type set on every published task event
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message received with manual acknowledgment pending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDelivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub redelivered: bool,
    pub data: Vec<u8>,
}

/// Stream of deliveries for one `consume` call; ends when the channel dies
pub type DeliveryStream = BoxStream<'static, MessagingResult<InboundDelivery>>;

/// Outbound message; delivery is always persistent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage<'a> {
    pub exchange: &'a str,
    pub routing_key: &'a str,
    pub payload: &'a [u8],
    pub content_type: &'a str,
    pub mandatory: bool,
}

#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Declare a durable topic exchange (idempotent)
    async fn declare_topic_exchange(&self, exchange: &str) -> MessagingResult<()>;

    /// Declare a durable, non-exclusive, non-auto-delete queue (idempotent)
    async fn declare_durable_queue(&self, queue: &str) -> MessagingResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> MessagingResult<()>;

    /// Publish and wait for the broker's verdict; a mandatory message nobody
    /// is bound to receive comes back as [`MessagingError::Unroutable`]
    ///
    /// [`MessagingError::Unroutable`]: super::errors::MessagingError::Unroutable
    async fn publish(&self, message: OutboundMessage<'_>) -> MessagingResult<()>;

    /// Start a manual-ack consumer on `queue`
    async fn consume(&self, queue: &str, consumer_tag: &str) -> MessagingResult<DeliveryStream>;

    /// Acknowledge a single delivery
    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()>;

    /// Reject a single delivery
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> MessagingResult<()>;

    async fn close(&self) -> MessagingResult<()>;
}

#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Open a fresh connection and a channel on it
    async fn connect(&self) -> MessagingResult<Arc<dyn BrokerChannel>>;

    fn provider_name(&self) -> &'static str;
}
