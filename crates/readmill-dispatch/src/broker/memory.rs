// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory broker for testing.
//!
//! Serves a pre-loaded queue of payloads and records every published
//! status event instead of talking to a real broker.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::broker::traits::{StatusEvent, TaskBroker};
use crate::error::{DispatchError, Result};

/// In-memory broker for testing.
pub struct InMemoryBroker {
    queue: Mutex<VecDeque<String>>,
    published: Mutex<Vec<StatusEvent>>,
    /// If true, an empty queue blocks `receive` forever instead of
    /// reporting the queue closed
    pub block_when_empty: bool,
    /// If true, every publish fails
    pub publish_fails: bool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create an empty broker whose queue reports closed immediately.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
            block_when_empty: false,
            publish_fails: false,
        }
    }

    /// Create a broker pre-loaded with inbound payloads, served in
    /// order; once drained the queue reports closed.
    pub fn with_tasks(payloads: &[&str]) -> Self {
        Self {
            queue: Mutex::new(payloads.iter().map(|p| p.to_string()).collect()),
            ..Self::new()
        }
    }

    /// All published status events, in publish order.
    pub async fn published(&self) -> Vec<StatusEvent> {
        self.published.lock().await.clone()
    }

    /// Number of published status events.
    pub async fn published_count(&self) -> usize {
        self.published.lock().await.len()
    }
}

#[async_trait]
impl TaskBroker for InMemoryBroker {
    fn broker_type(&self) -> &'static str {
        "memory"
    }

    async fn receive(&self) -> Result<Option<String>> {
        let next = self.queue.lock().await.pop_front();
        match next {
            Some(payload) => Ok(Some(payload)),
            None if self.block_when_empty => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn publish_status(&self, event: &StatusEvent) -> Result<()> {
        if self.publish_fails {
            return Err(DispatchError::Broker(
                "simulated publish failure".to_string(),
            ));
        }
        self.published.lock().await.push(event.clone());
        Ok(())
    }
}
