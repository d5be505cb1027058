//! # Broker Wire Messages
//!
//! The JSON body published to the topic exchange and read back by the consumer:
//!
//! ```json
//! {"Id": "5f0c...", "Action": "Created", "Status": "New"}
//! ```
//!
//! Routing key is `task.<action lowercased>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::types::TaskDomainEvent;
use crate::config::UpdatedStatusMode;

/// Status value Updated messages carry under [`UpdatedStatusMode::Legacy`]
pub const LEGACY_UPDATED_STATUS: &str = "Created";

/// Status value carried by Deleted messages
pub const DELETED_STATUS: &str = "Deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskAction {
    Created,
    Updated,
    Deleted,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
        }
    }

    pub fn routing_key(&self) -> String {
        format!("task.{}", self.as_str().to_lowercase())
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskWireEvent {
    pub id: Uuid,
    pub action: TaskAction,
    pub status: String,
}

impl TaskWireEvent {
    /// Build the broker message for a domain event; the status is fixed here
    /// and never recomputed at delivery time
    pub fn from_domain(event: &TaskDomainEvent, updated_status: UpdatedStatusMode) -> Self {
        match event {
            TaskDomainEvent::Created(snapshot) => Self {
                id: snapshot.id,
                action: TaskAction::Created,
                status: snapshot.status.to_string(),
            },
            TaskDomainEvent::Updated {
                task_id,
                new_status,
            } => Self {
                id: *task_id,
                action: TaskAction::Updated,
                status: match updated_status {
                    UpdatedStatusMode::Legacy => LEGACY_UPDATED_STATUS.to_string(),
                    UpdatedStatusMode::NewStatus => new_status.to_string(),
                },
            },
            TaskDomainEvent::Deleted { task_id } => Self {
                id: *task_id,
                action: TaskAction::Deleted,
                status: DELETED_STATUS.to_string(),
            },
        }
    }

    pub fn routing_key(&self) -> String {
        self.action.routing_key()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
