// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the dispatcher and its brokers.

use std::path::PathBuf;
use thiserror::Error;

/// Result type using DispatchError
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors raised while consuming, executing, or reporting queued tasks.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// An inbound payload was not a valid task message.
    #[error("cannot decode task message: {0}")]
    MessageDecode(#[from] serde_json::Error),

    /// The broker connection or a queue operation failed.
    #[error("broker error: {0}")]
    Broker(String),

    /// Another live dispatcher holds the work-directory claim.
    #[error("work directory '{dir}' is already claimed by process {pid}")]
    Lock {
        /// The contested work directory.
        dir: PathBuf,
        /// Pid recorded in the existing pidfile.
        pid: i32,
    },

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_display() {
        let err = DispatchError::Lock {
            dir: PathBuf::from("/var/run/readmill"),
            pid: 4711,
        };
        assert_eq!(
            err.to_string(),
            "work directory '/var/run/readmill' is already claimed by process 4711"
        );
    }

    #[test]
    fn test_message_decode_conversion() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: DispatchError = bad.into();
        assert!(matches!(err, DispatchError::MessageDecode(_)));
        assert!(err.to_string().starts_with("cannot decode task message"));
    }
}
