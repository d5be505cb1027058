//! Task storage seam. Stores task state only; pending events stay with the
//! in-flight aggregate and are never persisted.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::TaskEventsResult;
use crate::events::TaskSnapshot;
use crate::models::Task;

#[async_trait]
pub trait TaskRepository: Send + Sync + 'static {
    async fn insert(&self, task: &Task) -> TaskEventsResult<()>;

    async fn find(&self, task_id: Uuid) -> TaskEventsResult<Option<Task>>;

    async fn save(&self, task: &Task) -> TaskEventsResult<()>;

    /// Returns whether a task was removed
    async fn remove(&self, task_id: Uuid) -> TaskEventsResult<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: DashMap<Uuid, TaskSnapshot>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: &Task) -> TaskEventsResult<()> {
        self.tasks.insert(task.id(), task.snapshot());
        Ok(())
    }

    async fn find(&self, task_id: Uuid) -> TaskEventsResult<Option<Task>> {
        Ok(self
            .tasks
            .get(&task_id)
            .map(|entry| Task::rehydrate(entry.value().clone())))
    }

    async fn save(&self, task: &Task) -> TaskEventsResult<()> {
        self.tasks.insert(task.id(), task.snapshot());
        Ok(())
    }

    async fn remove(&self, task_id: Uuid) -> TaskEventsResult<bool> {
        Ok(self.tasks.remove(&task_id).is_some())
    }
}
