//! # Task Event Publisher
//!
//! Owns the process-wide broker channel used to publish [`TaskWireEvent`]s to
//! the topic exchange.
//!
//! ## Channel lifecycle
//!
//! - Nothing is opened at construction; the first `publish` connects and
//!   declares the durable topic exchange.
//! - Initialization is single-flight: concurrent first publishers queue on an
//!   async mutex, one of them runs the connect/declare sequence and the others
//!   reuse its channel.
//! - Steady-state publishes only take a shared read lock and run concurrently
//!   on the same channel.
//! - Health is never probed. A publish that fails on a broken channel returns
//!   its error and discards the channel, so the next publish rebuilds it.
//!   There is no retry here; callers decide what a failed publish means.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::errors::{MessagingResult, PublishError};
use super::transport::{BrokerChannel, BrokerConnector, OutboundMessage, JSON_CONTENT_TYPE};
use crate::events::TaskWireEvent;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TaskEventPublisher {
    connector: Arc<dyn BrokerConnector>,
    exchange: String,
    channel: RwLock<Option<Arc<dyn BrokerChannel>>>,
    init_gate: Mutex<()>,
}

impl std::fmt::Debug for TaskEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEventPublisher")
            .field("provider", &self.connector.provider_name())
            .field("exchange", &self.exchange)
            .finish()
    }
}

impl TaskEventPublisher {
    pub fn new(connector: Arc<dyn BrokerConnector>, exchange: impl Into<String>) -> Self {
        Self {
            connector,
            exchange: exchange.into(),
            channel: RwLock::new(None),
            init_gate: Mutex::new(()),
        }
    }

    /// Serialize and publish one event as a persistent, mandatory message
    /// routed by `task.<action>`
    pub async fn publish(&self, event: &TaskWireEvent) -> Result<(), PublishError> {
        debug!(
            task_id = %event.id,
            action = %event.action,
            "Publishing task event"
        );

        let body = event.to_bytes()?;
        let routing_key = event.routing_key();
        let channel = self.channel().await.map_err(PublishError::ChannelUnavailable)?;

        let result = channel
            .publish(OutboundMessage {
                exchange: &self.exchange,
                routing_key: &routing_key,
                payload: &body,
                content_type: JSON_CONTENT_TYPE,
                mandatory: true,
            })
            .await;

        if let Err(err) = result {
            if err.invalidates_channel() {
                self.invalidate(&channel).await;
            }
            return Err(err.into());
        }

        info!(
            task_id = %event.id,
            routing_key = %routing_key,
            status = %event.status,
            "Published task event"
        );
        Ok(())
    }

    /// Whether a channel is currently cached
    pub async fn is_connected(&self) -> bool {
        self.channel.read().await.is_some()
    }

    /// Best-effort close of the cached channel, bounded by a timeout
    pub async fn close(&self) {
        let Some(channel) = self.channel.write().await.take() else {
            return;
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, channel.close()).await {
            Ok(Ok(())) => info!(exchange = %self.exchange, "Publisher channel closed"),
            Ok(Err(e)) => warn!(error = %e, "Publisher channel close failed"),
            Err(_) => warn!(
                timeout_secs = CLOSE_TIMEOUT.as_secs(),
                "Publisher channel close timed out"
            ),
        }
    }

    async fn channel(&self) -> MessagingResult<Arc<dyn BrokerChannel>> {
        if let Some(channel) = self.channel.read().await.as_ref() {
            return Ok(channel.clone());
        }

        let _gate = self.init_gate.lock().await;

        // Another publisher may have finished initializing while we waited
        if let Some(channel) = self.channel.read().await.as_ref() {
            return Ok(channel.clone());
        }

        let channel = self.initialize().await?;
        *self.channel.write().await = Some(channel.clone());
        Ok(channel)
    }

    async fn initialize(&self) -> MessagingResult<Arc<dyn BrokerChannel>> {
        info!(
            provider = self.connector.provider_name(),
            exchange = %self.exchange,
            "Initializing publisher channel"
        );

        let channel = self.connector.connect().await?;
        if let Err(e) = channel.declare_topic_exchange(&self.exchange).await {
            let _ = channel.close().await;
            return Err(e);
        }
        Ok(channel)
    }

    async fn invalidate(&self, failed: &Arc<dyn BrokerChannel>) {
        let mut slot = self.channel.write().await;
        let is_current = slot
            .as_ref()
            .map(|current| Arc::ptr_eq(current, failed))
            .unwrap_or(false);

        if is_current {
            warn!(
                exchange = %self.exchange,
                "Discarding broken publisher channel; next publish reconnects"
            );
            *slot = None;
        }
    }
}
