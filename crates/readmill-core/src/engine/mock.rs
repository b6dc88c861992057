// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock engine for testing.
//!
//! Records workflow submissions without spawning processes. An optional
//! effects closure decides each exit code and can create the output
//! files a real workflow would leave behind.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::engine::traits::{EngineExit, EngineRequest, WorkflowEngine};
use crate::error::Result;

type EffectFn = Arc<dyn Fn(&EngineRequest) -> i32 + Send + Sync>;

/// Mock engine for testing.
pub struct MockEngine {
    invocations: Mutex<Vec<EngineRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    /// Optional delay to simulate execution time (in milliseconds)
    pub execution_delay_ms: u64,
    /// If true, workflows exit non-zero by default
    pub fail_by_default: bool,
    effects: Option<EffectFn>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a mock engine where every workflow exits 0.
    pub fn new() -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            execution_delay_ms: 0,
            fail_by_default: false,
            effects: None,
        }
    }

    /// Create a mock engine where every workflow exits 1.
    pub fn failing() -> Self {
        Self {
            fail_by_default: true,
            ..Self::new()
        }
    }

    /// Create a mock engine whose exit codes and side effects come from
    /// a closure. The closure runs before the submission is considered
    /// finished, so it can create the files a workflow would produce.
    pub fn with_effects<F>(effects: F) -> Self
    where
        F: Fn(&EngineRequest) -> i32 + Send + Sync + 'static,
    {
        Self {
            effects: Some(Arc::new(effects)),
            ..Self::new()
        }
    }

    /// All recorded submissions, in call order.
    pub async fn invocations(&self) -> Vec<EngineRequest> {
        self.invocations.lock().await.clone()
    }

    /// Number of recorded submissions.
    pub async fn invocation_count(&self) -> usize {
        self.invocations.lock().await.len()
    }

    /// Highest number of submissions that were running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowEngine for MockEngine {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    async fn run_workflow(&self, request: &EngineRequest) -> Result<EngineExit> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        {
            let mut invocations = self.invocations.lock().await;
            invocations.push(request.clone());
        }

        if self.execution_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.execution_delay_ms)).await;
        }

        let code = match &self.effects {
            Some(effects) => effects(request),
            None if self.fail_by_default => 1,
            None => 0,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(EngineExit { code })
    }
}
