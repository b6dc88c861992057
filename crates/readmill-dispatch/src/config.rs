// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for readmill-dispatch.

use std::path::PathBuf;

/// Dispatcher configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL
    pub redis_url: String,
    /// Inbound task queue (Redis list) name
    pub task_queue: String,
    /// Outbound status queue (Redis list) name
    pub status_queue: String,
    /// Work directory for per-task logs and the pidfile
    pub work_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis_url = std::env::var("READMILL_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1/".to_string());

        let task_queue =
            std::env::var("READMILL_TASK_QUEUE").unwrap_or_else(|_| "readmill:tasks".to_string());

        let status_queue = std::env::var("READMILL_STATUS_QUEUE")
            .unwrap_or_else(|_| "readmill:status".to_string());

        // Consuming statuses back as tasks would loop forever.
        if task_queue == status_queue {
            return Err(ConfigError::QueueCollision(task_queue));
        }

        let work_dir = PathBuf::from(
            std::env::var("READMILL_WORK_DIR").unwrap_or_else(|_| ".readmill".to_string()),
        );

        Ok(Self {
            redis_url,
            task_queue,
            status_queue,
            work_dir,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The inbound and outbound queues resolve to the same list.
    #[error("task and status queues must differ (both are '{0}')")]
    QueueCollision(String),
}
