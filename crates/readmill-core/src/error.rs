// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types shared by the stage and engine layers.

use std::path::PathBuf;
use thiserror::Error;

/// Result type using StageError
pub type Result<T> = std::result::Result<T, StageError>;

/// Errors raised while preparing or executing a workflow stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// A sequencing read header could not be parsed into a readgroup.
    #[error("cannot derive readgroup from '{path}': {reason}")]
    ReadHeaderParse {
        /// FASTQ file whose first header was inspected.
        path: PathBuf,
        /// What was wrong with the header.
        reason: String,
    },

    /// The workflow engine exited with a non-zero status.
    #[error("stage '{stage}' failed for sample '{sample}' (exit code {code})")]
    Execution {
        /// Stage name (e.g. "align").
        stage: &'static str,
        /// Sanitized sample name.
        sample: String,
        /// Engine process exit code.
        code: i32,
    },

    /// No engine jar could be located under the source directory.
    #[error("no cromwell jar found under '{0}'")]
    EngineNotFound(PathBuf),

    /// A required workflow input key was absent from the configuration.
    #[error("missing workflow input '{0}'")]
    MissingInput(&'static str),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input or options descriptor could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
