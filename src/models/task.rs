//! # Task Aggregate
//!
//! The task entity and its pending domain events. Every state-changing
//! operation appends exactly one [`TaskDomainEvent`] before returning; the
//! write path takes the whole sequence with [`Task::drain_events`] once the
//! change is committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::events::{TaskDomainEvent, TaskSnapshot};

/// Task lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    New,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(Self::New),
            "InProgress" => Ok(Self::InProgress),
            "Completed" => Ok(Self::Completed),
            other => Err(format!("Unknown task status: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    id: Uuid,
    title: String,
    description: String,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<TaskDomainEvent>,
}

impl Task {
    /// Create a new task in `New` status with a single pending Created event
    pub fn new(
        title: impl Into<String>,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let title = title.into();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }

        let mut task = Self {
            id: Uuid::new_v4(),
            title,
            description: description.unwrap_or_default(),
            status: TaskStatus::New,
            created_at,
            updated_at: created_at,
            events: Vec::with_capacity(1),
        };
        task.events.push(TaskDomainEvent::Created(task.snapshot()));
        Ok(task)
    }

    /// Rebuild a stored task; loading never produces events
    pub fn rehydrate(snapshot: TaskSnapshot) -> Self {
        Self {
            id: snapshot.id,
            title: snapshot.title,
            description: snapshot.description,
            status: snapshot.status,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Pending events in the order their operations ran
    pub fn events(&self) -> &[TaskDomainEvent] {
        &self.events
    }

    /// Records an Updated event even when the status does not change
    pub fn update_status(&mut self, status: TaskStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        self.events.push(TaskDomainEvent::Updated {
            task_id: self.id,
            new_status: status,
        });
    }

    /// Marks the task for deletion; removal from storage is the caller's job
    pub fn delete(&mut self) {
        self.events.push(TaskDomainEvent::Deleted { task_id: self.id });
    }

    /// Take ownership of every pending event, leaving the log empty
    pub fn drain_events(&mut self) -> Vec<TaskDomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task() -> Task {
        Task::new("Write spec", Some(String::new()), Utc::now()).unwrap()
    }

    #[test]
    fn test_new_task_has_one_created_event() {
        let task = new_task();

        assert_eq!(task.status(), TaskStatus::New);
        assert_eq!(task.created_at(), task.updated_at());
        assert_eq!(task.events().len(), 1);
        match &task.events()[0] {
            TaskDomainEvent::Created(snapshot) => {
                assert_eq!(snapshot.id, task.id());
                assert_eq!(snapshot.title, "Write spec");
                assert_eq!(snapshot.status, TaskStatus::New);
            }
            other => panic!("Expected Created event, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_title_is_rejected() {
        let result = Task::new("", Some("desc".to_string()), Utc::now());
        assert_eq!(result.unwrap_err(), ValidationError::EmptyTitle);
    }

    #[test]
    fn test_missing_description_defaults_to_empty() {
        let task = Task::new("Title", None, Utc::now()).unwrap();
        assert_eq!(task.description(), "");
    }

    #[test]
    fn test_update_status_appends_in_call_order() {
        let mut task = new_task();
        task.drain_events();

        let at = Utc::now();
        task.update_status(TaskStatus::InProgress, at);
        task.update_status(TaskStatus::Completed, at);

        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.updated_at(), at);
        assert_eq!(
            task.events(),
            &[
                TaskDomainEvent::Updated {
                    task_id: task.id(),
                    new_status: TaskStatus::InProgress
                },
                TaskDomainEvent::Updated {
                    task_id: task.id(),
                    new_status: TaskStatus::Completed
                },
            ]
        );
    }

    #[test]
    fn test_delete_twice_appends_two_events() {
        let mut task = new_task();
        task.delete();
        task.delete();

        let deleted = task
            .events()
            .iter()
            .filter(|e| matches!(e, TaskDomainEvent::Deleted { .. }))
            .count();
        assert_eq!(deleted, 2);
        assert_eq!(task.events().len(), 3);
    }

    #[test]
    fn test_drain_is_destructive() {
        let mut task = new_task();
        task.update_status(TaskStatus::Completed, Utc::now());

        let first = task.drain_events();
        let second = task.drain_events();

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert!(task.events().is_empty());
    }

    #[test]
    fn test_created_snapshot_is_not_affected_by_later_changes() {
        let mut task = new_task();
        task.update_status(TaskStatus::Completed, Utc::now());

        match &task.events()[0] {
            TaskDomainEvent::Created(snapshot) => assert_eq!(snapshot.status, TaskStatus::New),
            other => panic!("Expected Created event, got {other:?}"),
        }
    }

    #[test]
    fn test_rehydrated_task_has_no_pending_events() {
        let mut task = new_task();
        task.update_status(TaskStatus::InProgress, Utc::now());

        let loaded = Task::rehydrate(task.snapshot());
        assert_eq!(loaded.id(), task.id());
        assert_eq!(loaded.status(), TaskStatus::InProgress);
        assert!(loaded.events().is_empty());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("InProgress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert!("Done".parse::<TaskStatus>().is_err());
    }
}
