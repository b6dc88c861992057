// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task dispatch and lifecycle tracking.
//!
//! The dispatcher consumes task messages one at a time, publishes
//! LAUNCHED for each before its command starts, and runs the command as
//! a spawned `bash -c` unit whose completion publishes COMPLETED or
//! FAILED. Launch order therefore matches arrival order; completion
//! order is whatever the runtime produces.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{StatusEvent, TaskBroker, TaskStatus};
use crate::error::Result;

/// Pause before retrying after a failed receive, so a broken broker
/// link does not spin the consume loop.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One inbound task submission.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskMessage {
    /// Free-form label carried into logs; never used to pick behavior.
    pub category: String,
    /// Shell command to execute.
    pub command: String,
}

impl TaskMessage {
    /// Decode a raw queue payload.
    ///
    /// Both fields are required; anything else in the object is
    /// ignored.
    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// One tracked task.
///
/// Records live in the dispatcher's table from message receipt until
/// the terminal status is published.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Dispatcher-assigned identifier.
    pub task_id: u64,
    /// Category label from the inbound message.
    pub category: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
}

/// Message-driven remote task dispatcher.
pub struct TaskDispatcher {
    broker: Arc<dyn TaskBroker>,
    work_dir: PathBuf,
    next_task_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, TaskRecord>>>,
    shutdown: Arc<Notify>,
}

impl TaskDispatcher {
    /// Create a dispatcher consuming from `broker`, writing per-task
    /// logs under `work_dir`.
    pub fn new(broker: Arc<dyn TaskBroker>, work_dir: PathBuf) -> Self {
        Self {
            broker,
            work_dir,
            next_task_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Number of tasks currently tracked (launched, not yet terminal).
    pub async fn in_flight(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Run the consume loop.
    ///
    /// The loop exits when the queue closes or the shutdown signal is
    /// received; either way, commands already launched are allowed to
    /// finish and publish their terminal status before this returns.
    pub async fn run(&self) -> Result<()> {
        info!(
            broker = self.broker.broker_type(),
            work_dir = %self.work_dir.display(),
            "Task dispatcher started"
        );

        tokio::fs::create_dir_all(&self.work_dir).await?;

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Task dispatcher received shutdown signal");
                    break;
                }

                received = self.broker.receive() => match received {
                    Ok(Some(payload)) => {
                        self.handle_payload(&payload, &mut handles).await;
                        handles.retain(|handle| !handle.is_finished());
                    }
                    Ok(None) => {
                        info!("Task queue closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to receive from task queue");
                        tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                    }
                }
            }
        }

        // Let in-flight commands reach their terminal status.
        for handle in handles {
            let _ = handle.await;
        }

        info!("Task dispatcher stopped");
        Ok(())
    }

    /// Decode one payload, record it, publish LAUNCHED, and spawn its
    /// command. Malformed payloads are logged and dropped.
    async fn handle_payload(&self, payload: &str, handles: &mut Vec<JoinHandle<()>>) {
        let message = match TaskMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, payload = %payload, "Dropping malformed task message");
                return;
            }
        };

        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let record = TaskRecord {
            task_id,
            category: message.category.clone(),
            received_at: Utc::now(),
        };
        self.tasks.lock().await.insert(task_id, record);

        info!(task_id, category = %message.category, "Task received");
        publish(&self.broker, StatusEvent::now(task_id, TaskStatus::Launched)).await;

        let broker = self.broker.clone();
        let tasks = self.tasks.clone();
        let log_path = self.work_dir.join(format!("task-{task_id}.log"));
        let category = message.category;
        let command = message.command;

        handles.push(tokio::spawn(async move {
            let status = match run_command(&command, &log_path).await {
                Ok(0) => TaskStatus::Completed,
                Ok(code) => {
                    warn!(task_id, category = %category, code, "Task command exited non-zero");
                    TaskStatus::Failed
                }
                Err(e) => {
                    error!(task_id, category = %category, error = %e, "Task command could not run");
                    TaskStatus::Failed
                }
            };

            publish(&broker, StatusEvent::now(task_id, status)).await;
            tasks.lock().await.remove(&task_id);
            info!(task_id, category = %category, status = ?status, "Task finished");
        }));
    }
}

/// Publish one status event, logging instead of propagating failures:
/// a lost status must not keep the command or the loop from running.
async fn publish(broker: &Arc<dyn TaskBroker>, event: StatusEvent) {
    if let Err(e) = broker.publish_status(&event).await {
        error!(task_id = event.task_id, error = %e, "Failed to publish task status");
    }
}

/// Run one shell command, appending stdout and stderr to `log_path`.
///
/// Returns the exit code (-1 when terminated by a signal). Spawn
/// failures surface as `Err`.
async fn run_command(command: &str, log_path: &Path) -> std::io::Result<i32> {
    let stdout_log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let stderr_log = stdout_log.try_clone()?;

    let status = Command::new("bash")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_log))
        .stderr(Stdio::from(stderr_log))
        .status()
        .await?;

    Ok(status.code().unwrap_or(-1))
}
