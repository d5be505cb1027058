//! # In-Process Task Event Bus
//!
//! Decouples the write path from delivery mechanics. Delivery paths register
//! as [`TaskEventHandler`]s; in-process observers can also [`subscribe`] to a
//! broadcast copy of every event.
//!
//! For one event all handlers run concurrently, each bounded by the handler
//! timeout. A handler that fails, times out or panics is logged and counted;
//! it never affects the other handlers or the caller.
//!
//! [`subscribe`]: TaskEventBus::subscribe

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::TaskDomainEvent;
use super::webhook::DeliveryError;
use crate::messaging::PublishError;

const DEFAULT_BROADCAST_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Broker publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Webhook delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Handler timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Handler panicked: {message}")]
    Panicked { message: String },
}

#[async_trait]
pub trait TaskEventHandler: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &TaskDomainEvent) -> Result<(), DispatchError>;
}

/// Per-event outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for HandlerReport {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

pub struct TaskEventBus {
    handlers: Vec<Arc<dyn TaskEventHandler>>,
    handler_timeout: Duration,
    sender: broadcast::Sender<TaskDomainEvent>,
}

impl std::fmt::Debug for TaskEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("TaskEventBus")
            .field("handlers", &names)
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

impl TaskEventBus {
    pub fn new(handler_timeout: Duration) -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            handlers: Vec::new(),
            handler_timeout,
            sender,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskDomainEvent> {
        self.sender.subscribe()
    }

    /// Hand one event to every handler and wait for all of them
    pub async fn publish(&self, event: &TaskDomainEvent) -> HandlerReport {
        // No subscribers is fine
        let _ = self.sender.send(event.clone());

        let outcomes = join_all(self.handlers.iter().map(|handler| async move {
            let guarded = AssertUnwindSafe(handler.handle(event)).catch_unwind();
            let result = match tokio::time::timeout(self.handler_timeout, guarded).await {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => Err(DispatchError::Panicked {
                    message: panic_message(panic.as_ref()),
                }),
                Err(_) => Err(DispatchError::Timeout {
                    timeout_ms: self.handler_timeout.as_millis() as u64,
                }),
            };
            (handler.name(), result)
        }))
        .await;

        let mut report = HandlerReport::default();
        for (name, result) in outcomes {
            match result {
                Ok(()) => {
                    debug!(handler = name, task_id = %event.task_id(), kind = event.kind(), "Handler succeeded");
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(
                        handler = name,
                        task_id = %event.task_id(),
                        kind = event.kind(),
                        error = %e,
                        "Task event handler failed"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
