//! # Task Services
//!
//! Persistence seam and the write path that triggers event dispatch.

pub mod repository;
pub mod task_service;

pub use repository::{InMemoryTaskRepository, TaskRepository};
pub use task_service::{DispatchMode, TaskService};
