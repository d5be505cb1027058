//! # Task Event Dispatcher
//!
//! Runs after a write has committed: takes the events drained from the
//! aggregate and fans each one out to the broker and the webhook through the
//! [`TaskEventBus`]. Events are dispatched one after another in log order.
//! Nothing here returns an error to the caller; delivery problems end up in
//! the logs and in the returned [`DispatchSummary`].
//!
//! There is no outbox. Events lost to a crash between commit and dispatch are
//! not recovered.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::bus::{DispatchError, HandlerReport, TaskEventBus, TaskEventHandler};
use super::types::TaskDomainEvent;
use super::webhook::{DeliveryError, WebhookClient};
use super::wire::TaskWireEvent;
use crate::config::{PublisherSettings, UpdatedStatusMode};
use crate::messaging::{BrokerConnector, TaskEventPublisher};

/// Publishes each event to the topic exchange
#[derive(Debug)]
pub struct BrokerEventHandler {
    publisher: Arc<TaskEventPublisher>,
    updated_status: UpdatedStatusMode,
}

impl BrokerEventHandler {
    pub fn new(publisher: Arc<TaskEventPublisher>, updated_status: UpdatedStatusMode) -> Self {
        Self {
            publisher,
            updated_status,
        }
    }
}

#[async_trait]
impl TaskEventHandler for BrokerEventHandler {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn handle(&self, event: &TaskDomainEvent) -> Result<(), DispatchError> {
        let wire = TaskWireEvent::from_domain(event, self.updated_status);
        self.publisher.publish(&wire).await?;
        Ok(())
    }
}

/// Posts each event to the downstream listener
#[derive(Debug)]
pub struct WebhookEventHandler {
    client: WebhookClient,
}

impl WebhookEventHandler {
    pub fn new(client: WebhookClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskEventHandler for WebhookEventHandler {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn handle(&self, event: &TaskDomainEvent) -> Result<(), DispatchError> {
        self.client.notify(event).await?;
        Ok(())
    }
}

/// Totals for one `dispatch` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub events: usize,
    pub handlers: HandlerReport,
}

#[derive(Debug, Clone)]
pub struct TaskEventDispatcher {
    bus: Arc<TaskEventBus>,
    publisher: Option<Arc<TaskEventPublisher>>,
}

impl TaskEventDispatcher {
    pub fn new(bus: Arc<TaskEventBus>) -> Self {
        Self {
            bus,
            publisher: None,
        }
    }

    /// Broker and webhook paths wired from validated settings. Nothing
    /// connects until the first event is dispatched.
    pub fn from_settings(
        settings: &PublisherSettings,
        connector: Arc<dyn BrokerConnector>,
    ) -> Result<Self, DeliveryError> {
        let publisher = Arc::new(TaskEventPublisher::new(
            connector,
            settings.broker.exchange.clone(),
        ));
        let webhook = WebhookClient::new(&settings.webhook)?;

        let bus = TaskEventBus::new(settings.dispatch.handler_timeout())
            .with_handler(Arc::new(BrokerEventHandler::new(
                publisher.clone(),
                settings.dispatch.updated_status,
            )))
            .with_handler(Arc::new(WebhookEventHandler::new(webhook)));

        info!(
            exchange = %settings.broker.exchange,
            webhook = %settings.webhook.base_url,
            updated_status = ?settings.dispatch.updated_status,
            "Task event dispatcher ready"
        );

        Ok(Self {
            bus: Arc::new(bus),
            publisher: Some(publisher),
        })
    }

    /// Deliver events in order, waiting for every handler
    pub async fn dispatch(&self, events: Vec<TaskDomainEvent>) -> DispatchSummary {
        dispatch_all(&self.bus, events).await
    }

    /// Same as [`dispatch`](Self::dispatch) on a spawned task, so the caller
    /// can answer its client before delivery finishes
    pub fn dispatch_detached(&self, events: Vec<TaskDomainEvent>) -> JoinHandle<DispatchSummary> {
        let bus = self.bus.clone();
        tokio::spawn(async move { dispatch_all(&bus, events).await })
    }

    /// Close the broker channel if this dispatcher owns one
    pub async fn shutdown(&self) {
        if let Some(publisher) = &self.publisher {
            publisher.close().await;
        }
    }
}

async fn dispatch_all(bus: &TaskEventBus, events: Vec<TaskDomainEvent>) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    for event in &events {
        debug!(task_id = %event.task_id(), kind = event.kind(), "Dispatching task event");
        summary.handlers += bus.publish(event).await;
        summary.events += 1;
    }
    summary
}
