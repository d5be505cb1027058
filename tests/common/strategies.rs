use proptest::prelude::*;
use task_events::TaskStatus;

/// One mutation applied to an existing task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOperation {
    UpdateStatus(TaskStatus),
    Delete,
}

/// Strategy for generating non-empty task titles
pub fn title_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9 ]{0,63}"
}

/// Strategy for generating optional descriptions
pub fn description_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-zA-Z0-9 .,!?]{0,255}")
}

pub fn status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::New),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Completed),
    ]
}

pub fn operation_strategy() -> impl Strategy<Value = TaskOperation> {
    prop_oneof![
        4 => status_strategy().prop_map(TaskOperation::UpdateStatus),
        1 => Just(TaskOperation::Delete),
    ]
}

/// Strategy for generating sequences of mutations
pub fn operations_strategy() -> impl Strategy<Value = Vec<TaskOperation>> {
    prop::collection::vec(operation_strategy(), 0..20)
}
