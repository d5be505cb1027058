mod common;

use chrono::Utc;
use common::strategies::*;
use proptest::prelude::*;
use task_events::config::UpdatedStatusMode;
use task_events::{Task, TaskAction, TaskDomainEvent, TaskWireEvent};

fn apply(task: &mut Task, operation: TaskOperation) {
    match operation {
        TaskOperation::UpdateStatus(status) => task.update_status(status, Utc::now()),
        TaskOperation::Delete => task.delete(),
    }
}

proptest! {
    /// Property: a new task always starts with exactly one Created event
    #[test]
    fn new_task_has_single_created_event(title in title_strategy(), description in description_strategy()) {
        let task = Task::new(title.clone(), description, Utc::now()).unwrap();
        prop_assert_eq!(task.events().len(), 1);
        let is_created = matches!(&task.events()[0], TaskDomainEvent::Created(s) if s.title == title);
        prop_assert!(is_created);
    }

    /// Property: every operation appends exactly one event, in call order
    #[test]
    fn events_follow_operation_order(operations in operations_strategy()) {
        let mut task = Task::new("Write spec", None, Utc::now()).unwrap();
        for operation in &operations {
            apply(&mut task, *operation);
        }

        let events = task.drain_events();
        prop_assert_eq!(events.len(), operations.len() + 1);
        for (event, operation) in events[1..].iter().zip(&operations) {
            match (event, operation) {
                (TaskDomainEvent::Updated { new_status, .. }, TaskOperation::UpdateStatus(status)) => {
                    prop_assert_eq!(new_status, status);
                }
                (TaskDomainEvent::Deleted { .. }, TaskOperation::Delete) => {}
                (event, operation) => prop_assert!(false, "{:?} does not match {:?}", event, operation),
            }
        }
        prop_assert!(events.iter().all(|e| e.task_id() == task.id()));
    }

    /// Property: draining twice never yields the same event twice
    #[test]
    fn drain_is_exactly_once(operations in operations_strategy()) {
        let mut task = Task::new("Write spec", None, Utc::now()).unwrap();
        for operation in &operations {
            apply(&mut task, *operation);
        }

        let first = task.drain_events();
        let second = task.drain_events();
        prop_assert_eq!(first.len(), operations.len() + 1);
        prop_assert!(second.is_empty());
    }

    /// Property: wire messages route by their lowercased action and only
    /// Updated messages depend on the status mode
    #[test]
    fn wire_mapping_is_consistent(operations in operations_strategy()) {
        let mut task = Task::new("Write spec", None, Utc::now()).unwrap();
        for operation in &operations {
            apply(&mut task, *operation);
        }

        for event in task.drain_events() {
            let legacy = TaskWireEvent::from_domain(&event, UpdatedStatusMode::Legacy);
            let current = TaskWireEvent::from_domain(&event, UpdatedStatusMode::NewStatus);

            prop_assert_eq!(legacy.id, event.task_id());
            prop_assert_eq!(legacy.routing_key(), format!("task.{}", event.kind()));
            match event {
                TaskDomainEvent::Updated { new_status, .. } => {
                    prop_assert_eq!(legacy.status.as_str(), "Created");
                    prop_assert_eq!(current.status, new_status.to_string());
                }
                TaskDomainEvent::Created(_) => {
                    prop_assert_eq!(legacy.action, TaskAction::Created);
                    prop_assert_eq!(legacy, current);
                }
                TaskDomainEvent::Deleted { .. } => {
                    prop_assert_eq!(legacy.status.as_str(), "Deleted");
                    prop_assert_eq!(legacy, current);
                }
            }
        }
    }
}
