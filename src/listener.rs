//! # Webhook Listener
//!
//! Receiving end of the webhook path. Each endpoint logs the callback and
//! answers 200; the most recent callbacks are also kept in [`ListenerState`]
//! so tests and local tooling can look at what arrived. Older ones are
//! dropped once `max_retained` is reached.
//!
//! | Route                     | Body                           |
//! |---------------------------|--------------------------------|
//! | `POST /taskCreated`       | [`TaskCreatedPayload`]         |
//! | `POST /taskStatusUpdated` | [`TaskStatusUpdatedPayload`]   |
//! | `POST /taskDeleted`       | bare task id                   |

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::events::webhook::{TASK_CREATED_PATH, TASK_DELETED_PATH, TASK_STATUS_UPDATED_PATH};
use crate::events::{TaskCreatedPayload, TaskStatusUpdatedPayload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedCallback {
    Created(TaskCreatedPayload),
    StatusUpdated(TaskStatusUpdatedPayload),
    Deleted(Uuid),
}

pub const DEFAULT_MAX_RETAINED: usize = 100;

#[derive(Debug, Clone)]
pub struct ListenerState {
    received: Arc<RwLock<VecDeque<ReceivedCallback>>>,
    max_retained: usize,
}

impl Default for ListenerState {
    fn default() -> Self {
        Self::with_max_retained(DEFAULT_MAX_RETAINED)
    }
}

impl ListenerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_retained` callbacks; zero keeps none
    pub fn with_max_retained(max_retained: usize) -> Self {
        Self {
            received: Arc::new(RwLock::new(VecDeque::new())),
            max_retained,
        }
    }

    /// Retained callbacks in arrival order
    pub async fn received(&self) -> Vec<ReceivedCallback> {
        self.received.read().await.iter().cloned().collect()
    }

    async fn record(&self, callback: ReceivedCallback) {
        if self.max_retained == 0 {
            return;
        }
        let mut received = self.received.write().await;
        while received.len() >= self.max_retained {
            received.pop_front();
        }
        received.push_back(callback);
    }
}

pub fn create_app(state: ListenerState) -> Router {
    Router::new()
        .route(&format!("/{TASK_CREATED_PATH}"), post(task_created))
        .route(&format!("/{TASK_STATUS_UPDATED_PATH}"), post(task_status_updated))
        .route(&format!("/{TASK_DELETED_PATH}"), post(task_deleted))
        .with_state(state)
}

async fn task_created(
    State(state): State<ListenerState>,
    Json(payload): Json<TaskCreatedPayload>,
) -> StatusCode {
    info!(
        task_id = %payload.id,
        title = %payload.title,
        status = %payload.status,
        "POST taskCreated"
    );
    state.record(ReceivedCallback::Created(payload)).await;
    StatusCode::OK
}

async fn task_status_updated(
    State(state): State<ListenerState>,
    Json(payload): Json<TaskStatusUpdatedPayload>,
) -> StatusCode {
    info!(
        task_id = %payload.id,
        new_status = %payload.new_status,
        "POST taskStatusUpdated"
    );
    state.record(ReceivedCallback::StatusUpdated(payload)).await;
    StatusCode::OK
}

async fn task_deleted(State(state): State<ListenerState>, Json(task_id): Json<Uuid>) -> StatusCode {
    info!(task_id = %task_id, "POST taskDeleted");
    state.record(ReceivedCallback::Deleted(task_id)).await;
    StatusCode::OK
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: ListenerState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr: SocketAddr = listener.local_addr()?;
    info!(address = %local_addr, "Webhook listener started");

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(address = %local_addr, "Webhook listener stopped");
    Ok(())
}
