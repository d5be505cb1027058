//! # Task Webhook Listener
//!
//! Serves the webhook endpoints (`/taskCreated`, `/taskStatusUpdated`,
//! `/taskDeleted`) and logs every callback. Binds to `listener.bind_address`
//! and keeps only the last `listener.max_retained` callbacks in memory.

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use task_events::config::ConfigLoader;
use task_events::listener::{self, ListenerState};
use task_events::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_structured_logging();

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    let bind_address = config.listener.bind_address.clone();

    let tcp = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {bind_address}"))?;

    let state = ListenerState::with_max_retained(config.listener.max_retained);

    listener::serve(tcp, state, shutdown_signal())
        .await
        .context("Webhook listener failed")?;

    info!("Task webhook listener shut down");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
