//! # Task Events Consumer
//!
//! Subscribes to the task exchange and processes every task event until
//! Ctrl+C or SIGTERM. Broker outages are ridden out with reconnect backoff;
//! missing configuration stops the process before anything connects.
//!
//! ## Usage
//!
//! ```bash
//! TASK_EVENTS__RABBITMQ__HOST=localhost \
//! TASK_EVENTS__RABBITMQ__QUEUE=task-events-consumer \
//! cargo run --bin task-events-consumer
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use task_events::config::{loader::sanitize_for_logging, ConfigLoader};
use task_events::logging;
use task_events::messaging::{AmqpConnector, TaskEventConsumer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_structured_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting task events consumer");

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    info!(config = %sanitize_for_logging(&config), "Configuration loaded");

    let settings = config
        .consumer_settings()
        .context("Invalid consumer configuration")?;
    let connector = AmqpConnector::new(&settings.broker).context("Invalid broker configuration")?;
    let consumer = Arc::new(TaskEventConsumer::from_settings(Arc::new(connector), &settings));

    let cancel = CancellationToken::new();
    let worker = {
        let consumer = consumer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.run(cancel).await })
    };

    info!("Press Ctrl+C to shut down");
    shutdown_signal().await;
    cancel.cancel();

    match worker.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Consumer stopped with an error"),
        Err(e) => error!(error = %e, "Consumer task failed"),
    }

    let stats = consumer.stats();
    info!(
        acked = stats.acked,
        rejected = stats.rejected,
        connect_attempts = stats.connect_attempts,
        "Task events consumer shut down"
    );
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
