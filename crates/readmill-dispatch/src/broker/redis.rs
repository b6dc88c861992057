// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Redis list broker.
//!
//! Tasks arrive by `BLPOP` on the task queue and statuses leave by
//! `RPUSH` on the status queue, so both sides behave as FIFO lists and
//! a received payload is removed from the queue at the moment it is
//! handed over.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::broker::traits::{StatusEvent, TaskBroker};
use crate::config::Config;
use crate::error::{DispatchError, Result};

/// Broker backed by two Redis lists.
pub struct RedisBroker {
    // A blocking pop stalls its whole connection, so the consumer gets
    // a dedicated one and publishes never queue behind it.
    consumer: ConnectionManager,
    publisher: ConnectionManager,
    task_queue: String,
    status_queue: String,
}

impl RedisBroker {
    /// Connect to the broker named by the configuration.
    ///
    /// Both connections are managed: dropped links are re-established
    /// on the next command rather than failing the dispatcher outright.
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| DispatchError::Broker(e.to_string()))?;
        let consumer = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| DispatchError::Broker(e.to_string()))?;
        let publisher = ConnectionManager::new(client)
            .await
            .map_err(|e| DispatchError::Broker(e.to_string()))?;

        Ok(Self {
            consumer,
            publisher,
            task_queue: config.task_queue.clone(),
            status_queue: config.status_queue.clone(),
        })
    }
}

#[async_trait]
impl TaskBroker for RedisBroker {
    fn broker_type(&self) -> &'static str {
        "redis"
    }

    async fn receive(&self) -> Result<Option<String>> {
        let mut conn = self.consumer.clone();
        // Timeout 0 blocks until a payload arrives; the reply is the
        // (list, element) pair.
        let reply: Option<(String, String)> = conn
            .blpop(&self.task_queue, 0.0)
            .await
            .map_err(|e| DispatchError::Broker(e.to_string()))?;
        Ok(reply.map(|(_, payload)| payload))
    }

    async fn publish_status(&self, event: &StatusEvent) -> Result<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| DispatchError::Broker(format!("cannot encode status event: {e}")))?;
        let mut conn = self.publisher.clone();
        let depth: i64 = conn
            .rpush(&self.status_queue, &payload)
            .await
            .map_err(|e| DispatchError::Broker(e.to_string()))?;
        debug!(
            task_id = event.task_id,
            queue_depth = depth,
            "Published status event"
        );
        Ok(())
    }
}
