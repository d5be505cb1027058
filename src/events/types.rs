//! # Domain Event Types
//!
//! Immutable records of task state changes, produced by the [`Task`] aggregate
//! and drained by the write path after a successful commit. The broker and
//! webhook shapes are derived from these (see [`super::wire`] and
//! [`super::webhook`]); they are never the same object.
//!
//! [`Task`]: crate::models::Task

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::TaskStatus;

/// Full copy of a task taken at the moment it was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskDomainEvent {
    Created(TaskSnapshot),
    Updated { task_id: Uuid, new_status: TaskStatus },
    Deleted { task_id: Uuid },
}

impl TaskDomainEvent {
    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Created(snapshot) => snapshot.id,
            Self::Updated { task_id, .. } | Self::Deleted { task_id } => *task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
        }
    }
}

impl fmt::Display for TaskDomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created(snapshot) => write!(f, "TaskCreated({})", snapshot.id),
            Self::Updated {
                task_id,
                new_status,
            } => write!(f, "TaskUpdated({task_id}, {new_status})"),
            Self::Deleted { task_id } => write!(f, "TaskDeleted({task_id})"),
        }
    }
}
