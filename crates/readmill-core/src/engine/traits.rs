// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine trait definitions.
//!
//! Defines the abstract interface for workflow engines.

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// One workflow submission.
///
/// All paths are prepared by the stage layer before submission: the
/// inputs and options descriptors already exist on disk, and the log
/// paths name where engine output should be appended.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    /// Stage name, used for logging (e.g. "align").
    pub stage: &'static str,
    /// Workflow document to run.
    pub workflow: PathBuf,
    /// Inputs descriptor (JSON).
    pub inputs: PathBuf,
    /// Options descriptor (JSON).
    pub options: PathBuf,
    /// File receiving the engine's standard output.
    pub stdout_log: PathBuf,
    /// File receiving the engine's standard error.
    pub stderr_log: PathBuf,
}

/// Exit status of a finished workflow run.
#[derive(Debug, Clone, Copy)]
pub struct EngineExit {
    /// Process exit code (-1 when terminated by signal).
    pub code: i32,
}

impl EngineExit {
    /// Whether the engine exited with code 0.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Trait for workflow engines.
///
/// Engines run one workflow submission to completion. They do NOT
/// interpret results or manage checkpoints; callers decide what a given
/// exit status means for their stage.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Engine type identifier (e.g. "cromwell", "mock")
    fn engine_type(&self) -> &'static str;

    /// Run one workflow synchronously, waiting for the engine to exit.
    async fn run_workflow(&self, request: &EngineRequest) -> Result<EngineExit>;
}
