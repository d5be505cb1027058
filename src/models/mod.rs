//! # Models
//!
//! The task aggregate. Persistence lives behind [`crate::services::TaskRepository`].

pub mod task;

pub use task::{Task, TaskStatus};
