#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, AMQP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Task Events
//!
//! Propagates task lifecycle changes (create, status update, delete) to
//! downstream listeners over two independent paths: a durable RabbitMQ topic
//! exchange and a synchronous HTTP webhook.
//!
//! ## Flow
//!
//! ```text
//! TaskService write ──▶ Task aggregate records TaskDomainEvent
//!        │ commit
//!        ▼
//! drain_events ──▶ TaskEventDispatcher ──┬─▶ TaskEventPublisher ──▶ exchange (task.<action>)
//!                                        └─▶ WebhookClient ──▶ POST <base>/<kind>
//!
//! exchange ──▶ queue (task.*) ──▶ TaskEventConsumer ──▶ ack / nack(requeue = false)
//! ```
//!
//! Delivery on either path is best effort. A failed publish or webhook call is
//! logged and never fails the write that produced the event.
//!
//! ## Module Organization
//!
//! - [`models`] - the task aggregate and its pending event log
//! - [`events`] - domain events, wire and webhook shapes, bus and dispatcher
//! - [`messaging`] - broker seams, RabbitMQ and in-memory transports,
//!   publisher and consumer
//! - [`services`] - task repository and the write path
//! - [`listener`] - webhook receiving endpoint
//! - [`config`] - layered configuration with fail-fast validation
//! - [`logging`] - tracing subscriber setup
//! - [`error`] - crate-level errors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use task_events::config::ConfigLoader;
//! use task_events::events::TaskEventDispatcher;
//! use task_events::messaging::AmqpConnector;
//! use task_events::services::{InMemoryTaskRepository, TaskService};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ConfigLoader::new().load()?;
//! let settings = config.publisher_settings()?;
//! let connector = Arc::new(AmqpConnector::new(&settings.broker)?);
//! let dispatcher = TaskEventDispatcher::from_settings(&settings, connector)?;
//!
//! let service = TaskService::new(Arc::new(InMemoryTaskRepository::new()), dispatcher);
//! let task = service.create_task("Write spec", None).await?;
//! println!("created {}", task.id());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod listener;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod services;

pub use config::{ConfigLoader, ConfigurationError, TaskEventsConfig};
pub use error::{TaskEventsError, TaskEventsResult, ValidationError};
pub use events::{TaskAction, TaskDomainEvent, TaskEventDispatcher, TaskWireEvent};
pub use messaging::{TaskEventConsumer, TaskEventPublisher};
pub use models::{Task, TaskStatus};
pub use services::{DispatchMode, TaskService};
