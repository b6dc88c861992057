// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readmill Dispatch - Remote Task Consumer
//!
//! A queue consumer responsible for:
//! - Receiving `{"category", "command"}` task submissions
//! - Running each command asynchronously with a per-task log
//! - Publishing LAUNCHED/COMPLETED/FAILED status events

use std::sync::Arc;
use tracing::{info, warn};

use readmill_dispatch::broker::{RedisBroker, TaskBroker};
use readmill_dispatch::config::Config;
use readmill_dispatch::dispatcher::TaskDispatcher;
use readmill_dispatch::pidfile::PidFile;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "readmill_dispatch=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        task_queue = %config.task_queue,
        status_queue = %config.status_queue,
        work_dir = %config.work_dir.display(),
        "Starting Readmill Dispatch"
    );

    // One consumer per work directory
    let _claim = PidFile::acquire(&config.work_dir)?;

    // Connect to the broker
    let broker = Arc::new(RedisBroker::connect(&config).await?);
    info!(broker = broker.broker_type(), "Broker connected");

    let dispatcher = TaskDispatcher::new(broker, config.work_dir.clone());
    let shutdown = dispatcher.shutdown_handle();

    // Ctrl-C stops consumption; commands already launched still publish
    // their terminal status before the process exits.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        shutdown.notify_one();
    });

    dispatcher.run().await?;

    info!("Readmill Dispatch shut down");

    Ok(())
}
