//! # Messaging Module
//!
//! Topic-exchange messaging for task events: the broker seams, their RabbitMQ
//! and in-memory implementations, the publishing side with its shared lazy
//! channel, and the long-running consumer.

pub mod amqp;
pub mod consumer;
pub mod errors;
pub mod in_memory;
pub mod publisher;
pub mod transport;

pub use amqp::AmqpConnector;
pub use consumer::{
    ConsumerState, ConsumerStats, LoggingWireEventHandler, ReconnectBackoff, Subscription,
    TaskEventConsumer, WireEventHandler,
};
pub use errors::{MessagingError, MessagingResult, ProcessingError, PublishError};
pub use in_memory::InMemoryBroker;
pub use publisher::TaskEventPublisher;
pub use transport::{BrokerChannel, BrokerConnector, DeliveryStream, InboundDelivery, OutboundMessage};
