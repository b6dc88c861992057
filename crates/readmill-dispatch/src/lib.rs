// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readmill Dispatch - Message-Driven Task Execution
//!
//! Remote companion to the pipeline orchestrator: consumes task
//! submissions from an inbound queue, runs each one as a shell command,
//! and publishes lifecycle status events to an outbound queue. Anything
//! that can reach the broker can hand work to the machine this consumer
//! runs on.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  BLPOP   ┌───────────────────────────────┐
//! │  task queue  │ ───────▶ │        TaskDispatcher         │
//! │ {"category", │          │  table: task_id → TaskRecord  │
//! │  "command"}  │          └───────────────────────────────┘
//! └──────────────┘                  │               │
//!                         bash -c <command>         │ LAUNCHED /
//!                                  │                │ COMPLETED /
//!                                  ▼                ▼ FAILED (RPUSH)
//!                          ┌──────────────┐  ┌──────────────┐
//!                          │ per-task log │  │ status queue │
//!                          └──────────────┘  └──────────────┘
//! ```
//!
//! # Task lifecycle
//!
//! RECEIVED → LAUNCHED → {COMPLETED | FAILED}. LAUNCHED is published
//! before the command starts, so launch order matches message arrival
//! order; terminal statuses arrive in completion order. A task's table
//! entry is removed once its terminal status is out. There are no
//! retries and no dead-letter queue: a malformed message is logged and
//! dropped, a failed command is reported as FAILED and forgotten.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `READMILL_REDIS_URL` | `redis://127.0.0.1/` | Broker address |
//! | `READMILL_TASK_QUEUE` | `readmill:tasks` | Inbound list |
//! | `READMILL_STATUS_QUEUE` | `readmill:status` | Outbound list |
//! | `READMILL_WORK_DIR` | `.readmill` | Task logs and pidfile |
//!
//! # Modules
//!
//! - [`config`]: Dispatcher configuration from environment variables
//! - [`error`]: Dispatcher error types
//! - [`broker`]: Task queue backends (Redis, in-memory)
//! - [`dispatcher`]: Task dispatch and lifecycle tracking
//! - [`pidfile`]: Work-directory pidfile lock

#![deny(missing_docs)]

/// Task queue backends.
pub mod broker;

/// Dispatcher configuration from environment variables.
pub mod config;

/// Task dispatch and lifecycle tracking.
pub mod dispatcher;

/// Dispatcher error types.
pub mod error;

/// Work-directory pidfile lock.
pub mod pidfile;

pub use broker::{InMemoryBroker, RedisBroker, StatusEvent, TaskBroker, TaskStatus};
pub use config::{Config, ConfigError};
pub use dispatcher::{TaskDispatcher, TaskMessage, TaskRecord};
pub use error::DispatchError;
pub use pidfile::PidFile;
