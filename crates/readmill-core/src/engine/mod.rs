// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine module - workflow execution backends.

pub mod cromwell;
pub mod mock;
mod traits;

pub use cromwell::CromwellEngine;
pub use mock::MockEngine;
pub use traits::*;
