//! # Webhook Delivery
//!
//! Synchronous HTTP notification of task changes. Each event kind has its own
//! path under the configured base URL and its own JSON body:
//!
//! | Event   | Path                | Body                                   |
//! |---------|---------------------|----------------------------------------|
//! | Created | `taskCreated`       | [`TaskCreatedPayload`]                 |
//! | Updated | `taskStatusUpdated` | [`TaskStatusUpdatedPayload`]           |
//! | Deleted | `taskDeleted`       | bare task id, e.g. `"5f0c..."`         |
//!
//! Any non-2xx answer is a [`DeliveryError`].

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{TaskDomainEvent, TaskSnapshot};
use crate::config::WebhookConfig;
use crate::models::TaskStatus;

pub const TASK_CREATED_PATH: &str = "taskCreated";
pub const TASK_STATUS_UPDATED_PATH: &str = "taskStatusUpdated";
pub const TASK_DELETED_PATH: &str = "taskDeleted";

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to build webhook client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid webhook URL for '{path}': {message}")]
    InvalidUrl { path: &'static str, message: String },

    #[error("Webhook request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Webhook {url} answered {status}")]
    Status { url: String, status: StatusCode },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskCreatedPayload {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TaskSnapshot> for TaskCreatedPayload {
    fn from(snapshot: &TaskSnapshot) -> Self {
        Self {
            id: snapshot.id,
            title: snapshot.title.clone(),
            description: snapshot.description.clone(),
            status: snapshot.status,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskStatusUpdatedPayload {
    pub id: Uuid,
    pub new_status: TaskStatus,
}

/// Path segment the event is posted to
pub fn webhook_path(event: &TaskDomainEvent) -> &'static str {
    match event {
        TaskDomainEvent::Created(_) => TASK_CREATED_PATH,
        TaskDomainEvent::Updated { .. } => TASK_STATUS_UPDATED_PATH,
        TaskDomainEvent::Deleted { .. } => TASK_DELETED_PATH,
    }
}

/// HTTP client for the downstream listener
pub struct WebhookClient {
    client: Client,
    base_url: Url,
}

impl std::fmt::Debug for WebhookClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("task-events/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        info!(
            base_url = %config.base_url,
            timeout_ms = config.timeout.as_millis() as u64,
            "Created webhook client"
        );

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// POST the event to its per-kind path and require a success status
    pub async fn notify(&self, event: &TaskDomainEvent) -> Result<(), DeliveryError> {
        let path = webhook_path(event);
        let url = self
            .base_url
            .join(path)
            .map_err(|e| DeliveryError::InvalidUrl {
                path,
                message: e.to_string(),
            })?;

        debug!(task_id = %event.task_id(), url = %url, "Posting webhook");

        let request = self.client.post(url.clone());
        let request = match event {
            TaskDomainEvent::Created(snapshot) => request.json(&TaskCreatedPayload::from(snapshot)),
            TaskDomainEvent::Updated {
                task_id,
                new_status,
            } => request.json(&TaskStatusUpdatedPayload {
                id: *task_id,
                new_status: *new_status,
            }),
            TaskDomainEvent::Deleted { task_id } => request.json(task_id),
        };

        let response = request.send().await.map_err(|source| DeliveryError::Http {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                url: url.to_string(),
                status,
            });
        }

        debug!(task_id = %event.task_id(), path, status = status.as_u16(), "Webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;
    use std::time::Duration;

    #[test]
    fn test_paths_per_event_kind() {
        let id = Uuid::new_v4();
        let task = Task::new("Write spec", None, Utc::now()).unwrap();

        assert_eq!(webhook_path(&TaskDomainEvent::Created(task.snapshot())), "taskCreated");
        assert_eq!(
            webhook_path(&TaskDomainEvent::Updated {
                task_id: id,
                new_status: TaskStatus::Completed
            }),
            "taskStatusUpdated"
        );
        assert_eq!(webhook_path(&TaskDomainEvent::Deleted { task_id: id }), "taskDeleted");
    }

    #[test]
    fn test_payload_field_names() {
        let task = Task::new("Write spec", None, Utc::now()).unwrap();
        let created = serde_json::to_value(TaskCreatedPayload::from(&task.snapshot())).unwrap();
        for key in ["Id", "Title", "Description", "Status", "CreatedAt", "UpdatedAt"] {
            assert!(created.get(key).is_some(), "missing {key}");
        }
        assert_eq!(created["Status"], "New");

        let updated = serde_json::to_value(TaskStatusUpdatedPayload {
            id: task.id(),
            new_status: TaskStatus::InProgress,
        })
        .unwrap();
        assert_eq!(updated["NewStatus"], "InProgress");
    }

    #[test]
    fn test_paths_join_under_base_path() {
        let client = WebhookClient::new(&WebhookConfig {
            base_url: Url::parse("http://listener:5080/hooks/").unwrap(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        let url = client.base_url().join(TASK_DELETED_PATH).unwrap();
        assert_eq!(url.as_str(), "http://listener:5080/hooks/taskDeleted");
    }

    #[tokio::test]
    async fn test_unreachable_listener_is_delivery_error() {
        let client = WebhookClient::new(&WebhookConfig {
            base_url: Url::parse("http://127.0.0.1:9/").unwrap(),
            timeout: Duration::from_millis(500),
        })
        .unwrap();

        let err = client
            .notify(&TaskDomainEvent::Deleted {
                task_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Http { .. }));
    }
}
