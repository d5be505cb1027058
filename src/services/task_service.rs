//! # Task Service
//!
//! The write path. Every mutation runs in the same order:
//!
//! 1. load or create the aggregate and apply the change
//! 2. persist it
//! 3. drain the pending events, exactly once
//! 4. hand them to the [`TaskEventDispatcher`]
//!
//! Only validation, persistence and not-found errors reach the caller.
//! Delivery failures are absorbed by the dispatcher.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::repository::TaskRepository;
use crate::error::{TaskEventsError, TaskEventsResult};
use crate::events::TaskEventDispatcher;
use crate::models::{Task, TaskStatus};

/// Whether writes wait for event delivery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Await broker and webhook delivery before returning
    #[default]
    Inline,
    /// Spawn delivery and return immediately
    Detached,
}

pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    dispatcher: TaskEventDispatcher,
    mode: DispatchMode,
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("dispatcher", &self.dispatcher)
            .field("mode", &self.mode)
            .finish()
    }
}

impl TaskService {
    pub fn new(repository: Arc<dyn TaskRepository>, dispatcher: TaskEventDispatcher) -> Self {
        Self {
            repository,
            dispatcher,
            mode: DispatchMode::default(),
        }
    }

    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub async fn create_task(
        &self,
        title: impl Into<String>,
        description: Option<String>,
    ) -> TaskEventsResult<Task> {
        let mut task = Task::new(title, description, Utc::now())?;
        self.repository.insert(&task).await?;
        info!(task_id = %task.id(), title = %task.title(), "Task created");

        self.dispatch_pending(&mut task).await;
        Ok(task)
    }

    pub async fn get_task(&self, task_id: Uuid) -> TaskEventsResult<Task> {
        self.repository
            .find(task_id)
            .await?
            .ok_or(TaskEventsError::TaskNotFound { task_id })
    }

    pub async fn update_status(&self, task_id: Uuid, status: TaskStatus) -> TaskEventsResult<Task> {
        let mut task = self.get_task(task_id).await?;
        task.update_status(status, Utc::now());
        self.repository.save(&task).await?;
        info!(task_id = %task_id, status = %status, "Task status updated");

        self.dispatch_pending(&mut task).await;
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: Uuid) -> TaskEventsResult<()> {
        let mut task = self.get_task(task_id).await?;
        task.delete();
        if !self.repository.remove(task_id).await? {
            return Err(TaskEventsError::TaskNotFound { task_id });
        }
        info!(task_id = %task_id, "Task deleted");

        self.dispatch_pending(&mut task).await;
        Ok(())
    }

    async fn dispatch_pending(&self, task: &mut Task) {
        let events = task.drain_events();
        if events.is_empty() {
            return;
        }

        match self.mode {
            DispatchMode::Inline => {
                let summary = self.dispatcher.dispatch(events).await;
                debug!(
                    task_id = %task.id(),
                    events = summary.events,
                    failed = summary.handlers.failed,
                    "Task events dispatched"
                );
            }
            DispatchMode::Detached => {
                // Fire and forget; the handle is not awaited
                drop(self.dispatcher.dispatch_detached(events));
            }
        }
    }
}
