//! # RabbitMQ Transport
//!
//! [`BrokerConnector`] / [`BrokerChannel`] implementation over the `lapin`
//! crate (AMQP 0.9.1).
//!
//! Channels are opened in publisher-confirm mode so that `publish` can report
//! what the broker did with the message: a mandatory message that matched no
//! binding comes back as [`MessagingError::Unroutable`] instead of being
//! silently dropped. lapin channels serialize frames internally, so concurrent
//! publishers can share one channel.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info};

use super::errors::{MessagingError, MessagingResult};
use super::transport::{BrokerChannel, BrokerConnector, DeliveryStream, InboundDelivery, OutboundMessage};
use crate::config::{BrokerConfig, ConfigResult};

/// AMQP delivery mode 2
const PERSISTENT_DELIVERY_MODE: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Opens lapin connections from validated broker settings
pub struct AmqpConnector {
    uri: String,
    redacted_uri: String,
    connection_name: String,
}

impl std::fmt::Debug for AmqpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpConnector")
            .field("uri", &self.redacted_uri)
            .field("connection_name", &self.connection_name)
            .finish()
    }
}

impl AmqpConnector {
    pub fn new(config: &BrokerConfig) -> ConfigResult<Self> {
        Ok(Self {
            uri: config.amqp_uri()?,
            redacted_uri: config.redacted_uri(),
            connection_name: config.connection_name.clone(),
        })
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> MessagingResult<Arc<dyn BrokerChannel>> {
        debug!(uri = %self.redacted_uri, "Opening RabbitMQ connection");

        let connection = Connection::connect(
            &self.uri,
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into()),
        )
        .await
        .map_err(|e| {
            MessagingError::connection(format!(
                "RabbitMQ connection to {} failed: {}",
                self.redacted_uri, e
            ))
        })?;

        let channel = connection.create_channel().await.map_err(|e| {
            MessagingError::connection(format!("RabbitMQ channel creation failed: {}", e))
        })?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                MessagingError::channel_operation("confirm_select", e.to_string())
            })?;

        info!(
            uri = %self.redacted_uri,
            channel_id = channel.id(),
            "RabbitMQ channel established"
        );

        Ok(Arc::new(AmqpChannel {
            connection,
            channel,
        }))
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}

/// One connection with the single channel opened on it
#[derive(Debug)]
pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_topic_exchange(&self, exchange: &str) -> MessagingResult<()> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::channel_operation("exchange_declare", e.to_string()))
    }

    async fn declare_durable_queue(&self, queue: &str) -> MessagingResult<()> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| MessagingError::channel_operation("queue_declare", e.to_string()))
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> MessagingResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::channel_operation("queue_bind", e.to_string()))
    }

    async fn publish(&self, message: OutboundMessage<'_>) -> MessagingResult<()> {
        let confirm = self
            .channel
            .basic_publish(
                message.exchange,
                message.routing_key,
                BasicPublishOptions {
                    mandatory: message.mandatory,
                    ..Default::default()
                },
                message.payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
                    .with_content_type(message.content_type.into()),
            )
            .await?;

        match confirm.await? {
            Confirmation::Ack(None) | Confirmation::NotRequested => Ok(()),
            Confirmation::Ack(Some(_returned)) => Err(MessagingError::unroutable(
                message.exchange,
                message.routing_key,
            )),
            Confirmation::Nack(_) => Err(MessagingError::rejected(
                message.exchange,
                message.routing_key,
            )),
        }
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> MessagingResult<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::channel_operation("basic_consume", e.to_string()))?;

        let deliveries = consumer.map(|result| {
            result
                .map(|delivery| InboundDelivery {
                    delivery_tag: delivery.delivery_tag,
                    routing_key: delivery.routing_key.as_str().to_string(),
                    redelivered: delivery.redelivered,
                    data: delivery.data,
                })
                .map_err(MessagingError::from)
        });

        Ok(deliveries.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(MessagingError::from)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> MessagingResult<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(MessagingError::from)
    }

    async fn close(&self) -> MessagingResult<()> {
        let channel_result = self.channel.close(REPLY_SUCCESS, "OK").await;
        let connection_result = self.connection.close(REPLY_SUCCESS, "OK").await;
        channel_result?;
        connection_result?;
        Ok(())
    }
}
