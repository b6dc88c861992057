// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker module - task queue backends.

pub mod memory;
pub mod redis;
mod traits;

pub use memory::InMemoryBroker;
pub use self::redis::RedisBroker;
pub use traits::*;
