// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readmill Core - Sequencing Pipeline Orchestration
//!
//! This crate turns raw sequencing reads (aligned BAMs or paired FASTQ
//! files) into analysis-ready aligned BAMs by driving an external
//! workflow engine and containerized bioinformatics tools. It owns the
//! orchestration concerns the engine does not: per-sample admission with
//! a concurrency cap, checkpoint-based resume, and one-time localization
//! of shared reference data.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Sample Manifests                          │
//! │                  (BAM rows, FASTQ-pair rows)                     │
//! └──────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       readmill-core (This Crate)                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │  Reference   │  │    Sample    │  │      Stage Runner      │  │
//! │  │  Librarian   │─▶│  Scheduler   │─▶│ (ubam conversion, then │  │
//! │  │ (run once)   │  │ (cap = N+1)  │  │      alignment)        │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//!          │                                       │
//!          │ docker run                            │ java -jar cromwell
//!          ▼                                       ▼
//! ┌───────────────────┐               ┌─────────────────────────────┐
//! │ Containerized     │               │      Workflow Engine        │
//! │ tools (bwa, gatk, │               │  (WDL documents, per-stage  │
//! │ bgzip, tabix)     │               │   inputs/options JSON)      │
//! └───────────────────┘               └─────────────────────────────┘
//!          │                                       │
//!          ▼                                       ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Filesystem state: reference library + localized_config.json,   │
//! │  per-sample checkpoints (unmapped_bams_list.txt, <s>.<ref>      │
//! │  .bam.md5), stage logs - the durable resume point of a run      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Stage chain per sample
//!
//! ```text
//!   BAM row ───▶ bam_to_ubam ──┐
//!                              ├──▶ unmapped_bams_list.txt ──▶ align
//!   FASTQ row ─▶ fastq_to_ubam ┘        (checkpoint)       (checkpoint:
//!               (one per pair,                              <sample>.<ref>
//!                keyed by readgroup)                          .bam.md5)
//! ```
//!
//! Checkpoints are written only after the engine exits successfully. A
//! failed stage leaves no checkpoint; re-running the orchestrator is the
//! retry mechanism.
//!
//! # Configuration
//!
//! A JSON document names the run; workflow input keys (dotted names
//! under the reference namespace) pass through to the engine untouched.
//!
//! | Key | Required | Default | Description |
//! |-----|----------|---------|-------------|
//! | `project_dir` | Yes | - | Per-sample output trees live here |
//! | `source_dir` | Yes | - | Workflow documents and the engine jar |
//! | `engine_config` | No | - | Engine config file (`-Dconfig.file`) |
//! | `bam_inputs` | No | - | BAM manifest path |
//! | `fastq_inputs` | No | - | FASTQ manifest path |
//! | `library` | No | `<project_dir>/library` | Reference library dir |
//! | `max_concurrent_samples` | No | `4` | Concurrency cap |
//! | `poll_interval` | No | `5` | Engine liveness poll (seconds) |
//! | `fail_fast` | No | `false` | Stop admitting after a failed batch |
//! | `clean_inputs` | No | `false` | Remove hard-linked ubam copies |
//!
//! # Modules
//!
//! - [`config`]: Pipeline configuration from a JSON document
//! - [`manifest`]: Tabular BAM/FASTQ input manifests
//! - [`error`]: Stage and engine error types
//! - [`command`]: External command execution seam (docker, gsutil, wget)
//! - [`library`]: Reference localization and auxiliary file preparation
//! - [`readgroup`]: Readgroup derivation from FASTQ headers
//! - [`engine`]: Workflow engine backends (Cromwell, mock)
//! - [`stage`]: Checkpointed per-sample stage execution
//! - [`scheduler`]: Sample admission and bounded concurrency

#![deny(missing_docs)]

/// External command execution seam.
pub mod command;

/// Pipeline configuration from a JSON document.
pub mod config;

/// Workflow engine backends.
pub mod engine;

/// Stage and engine error types.
pub mod error;

/// Reference localization and auxiliary file preparation.
pub mod library;

/// Tabular BAM/FASTQ input manifests.
pub mod manifest;

/// Readgroup derivation from FASTQ headers.
pub mod readgroup;

/// Sample admission and bounded concurrency.
pub mod scheduler;

/// Checkpointed per-sample stage execution.
pub mod stage;

pub use command::{CommandRunner, HostRunner};
pub use config::{ConfigError, PipelineConfig};
pub use engine::{CromwellEngine, MockEngine, WorkflowEngine};
pub use error::StageError;
pub use library::{LibraryError, LocalizedConfig, ReferenceLibrarian};
pub use scheduler::{RunReport, SampleScheduler};
pub use stage::StageRunner;
