use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use task_events::config::{
    BrokerConfig, DispatchConfig, PublisherSettings, UpdatedStatusMode, WebhookConfig,
};
use task_events::listener::{self, ListenerState};
use task_events::messaging::{
    ConsumerState, InMemoryBroker, MessagingResult, ProcessingError, Subscription,
    TaskEventConsumer, WireEventHandler,
};
use task_events::TaskWireEvent;

pub const EXCHANGE: &str = "task-events";
pub const QUEUE: &str = "task-events-consumer";

/// Poll `check` until it holds, failing the test after five seconds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Webhook listener on an ephemeral local port
pub struct TestListener {
    pub base_url: Url,
    pub state: ListenerState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestListener {
    pub async fn start() -> Self {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = Url::parse(&format!("http://{}/", tcp.local_addr().unwrap())).unwrap();
        let state = ListenerState::new();
        let (tx, rx) = oneshot::channel::<()>();

        let server_state = state.clone();
        tokio::spawn(async move {
            listener::serve(tcp, server_state, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            base_url,
            state,
            shutdown: Some(tx),
        }
    }
}

impl Drop for TestListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub fn publisher_settings(webhook_base: Url, updated_status: UpdatedStatusMode) -> PublisherSettings {
    PublisherSettings {
        broker: BrokerConfig {
            host: "localhost".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            exchange: EXCHANGE.to_string(),
            connection_name: "task-events-test".to_string(),
        },
        webhook: WebhookConfig {
            base_url: webhook_base,
            timeout: Duration::from_secs(2),
        },
        dispatch: DispatchConfig {
            handler_timeout_ms: 3_000,
            updated_status,
        },
    }
}

/// Consumer handler that keeps every event it saw
#[derive(Debug, Default)]
pub struct RecordingWireHandler {
    pub events: Mutex<Vec<TaskWireEvent>>,
}

#[async_trait]
impl WireEventHandler for RecordingWireHandler {
    async fn handle(&self, event: &TaskWireEvent) -> Result<(), ProcessingError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Consumer subscribed to the in-memory broker, running in the background
pub struct RunningConsumer {
    pub consumer: Arc<TaskEventConsumer>,
    pub handler: Arc<RecordingWireHandler>,
    cancel: CancellationToken,
    handle: JoinHandle<MessagingResult<()>>,
}

impl RunningConsumer {
    pub async fn start(broker: &InMemoryBroker) -> Self {
        let handler = Arc::new(RecordingWireHandler::default());
        let consumer = Arc::new(
            TaskEventConsumer::new(Arc::new(broker.clone()), Subscription::new(EXCHANGE, QUEUE))
                .with_handler(handler.clone()),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };

        let mut states = consumer.state_changes();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ConsumerState::Subscribed),
        )
        .await
        .unwrap()
        .unwrap();

        Self {
            consumer,
            handler,
            cancel,
            handle,
        }
    }

    pub async fn received(&self) -> Vec<TaskWireEvent> {
        self.handler.events.lock().await.clone()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.unwrap().unwrap();
    }
}
