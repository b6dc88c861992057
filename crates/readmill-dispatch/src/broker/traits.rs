// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker trait definitions.
//!
//! Defines the abstract interface for task queue brokers and the status
//! events they carry.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state published for a task.
///
/// Every task publishes `Launched` once, followed by exactly one of the
/// terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// The command was accepted and submitted for execution.
    Launched,
    /// The command exited with code 0.
    Completed,
    /// The command exited non-zero or could not be started.
    Failed,
}

/// One outbound status event.
///
/// The wire shape is fixed: `{"task_id": <int>, "timestamp": <ISO-8601>,
/// "status": "LAUNCHED"|"COMPLETED"|"FAILED"}`. The underlying command
/// result is never carried, only the outcome class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Dispatcher-assigned task identifier.
    pub task_id: u64,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// The lifecycle state entered.
    pub status: TaskStatus,
}

impl StatusEvent {
    /// Build an event for `task_id` stamped with the current time.
    pub fn now(task_id: u64, status: TaskStatus) -> Self {
        Self {
            task_id,
            timestamp: Utc::now(),
            status,
        }
    }
}

/// Trait for task queue brokers.
///
/// Brokers move raw payloads; decoding and status construction belong to
/// the dispatcher. Receiving removes the message from the queue, so a
/// payload handed to the dispatcher is already acknowledged.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Broker type identifier (e.g. "redis", "memory")
    fn broker_type(&self) -> &'static str;

    /// Block until the next inbound task payload arrives.
    ///
    /// `Ok(None)` means the queue is closed for good and the consume
    /// loop should stop.
    async fn receive(&self) -> Result<Option<String>>;

    /// Publish one status event to the outbound queue.
    async fn publish_status(&self, event: &StatusEvent) -> Result<()>;
}
