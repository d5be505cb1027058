//! # Crate Error Types
//!
//! Top-level errors for operations that are allowed to fail the caller.
//! Delivery-side errors (publish, webhook, consumer) live next to the code
//! that produces them and are never surfaced through a task write.

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;

/// Invalid aggregate input, rejected before anything is persisted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Task title can't be empty")]
    EmptyTitle,
}

#[derive(Debug, Error)]
pub enum TaskEventsError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: Uuid },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl TaskEventsError {
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }
}

pub type TaskEventsResult<T> = std::result::Result<T, TaskEventsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = TaskEventsError::from(ValidationError::EmptyTitle);
        assert_eq!(
            err.to_string(),
            "Validation error: Task title can't be empty"
        );
    }

    #[test]
    fn test_not_found_carries_id() {
        let id = Uuid::new_v4();
        let err = TaskEventsError::TaskNotFound { task_id: id };
        assert!(err.to_string().contains(&id.to_string()));
    }
}
