//! # Task Events
//!
//! Domain events recorded by the task aggregate and everything needed to get
//! them out of the process: the broker wire format, webhook payloads, the
//! in-process bus and the post-commit dispatcher.

pub mod bus;
pub mod dispatcher;
pub mod types;
pub mod webhook;
pub mod wire;

pub use bus::{DispatchError, HandlerReport, TaskEventBus, TaskEventHandler};
pub use dispatcher::{
    BrokerEventHandler, DispatchSummary, TaskEventDispatcher, WebhookEventHandler,
};
pub use types::{TaskDomainEvent, TaskSnapshot};
pub use webhook::{DeliveryError, TaskCreatedPayload, TaskStatusUpdatedPayload, WebhookClient};
pub use wire::{TaskAction, TaskWireEvent};
