// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work-directory pidfile lock.
//!
//! One dispatcher per work directory: a pidfile names the consuming
//! process. A file left behind by a dead process is broken and
//! replaced; a live holder aborts startup.

use std::fs;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use tracing::{info, warn};

use crate::error::{DispatchError, Result};

const PIDFILE_NAME: &str = "readmill-dispatch.pid";

/// Exclusive claim on a dispatcher work directory.
///
/// Dropping the guard removes the pidfile.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim `work_dir` for the current process.
    ///
    /// Fails with [`DispatchError::Lock`] when another live process
    /// holds the claim.
    pub fn acquire(work_dir: &Path) -> Result<Self> {
        fs::create_dir_all(work_dir)?;
        let path = work_dir.join(PIDFILE_NAME);

        match read_pid(&path) {
            Some(holder) if process_alive(holder) => {
                return Err(DispatchError::Lock {
                    dir: work_dir.to_path_buf(),
                    pid: holder,
                });
            }
            Some(holder) => {
                warn!(pid = holder, path = %path.display(), "Breaking stale pidfile");
            }
            None if path.exists() => {
                warn!(path = %path.display(), "Replacing unreadable pidfile");
            }
            None => {}
        }

        fs::write(&path, std::process::id().to_string())?;
        info!(path = %path.display(), "Acquired work-directory claim");
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove pidfile");
        }
    }
}

/// Pid stored at `path`, if the file exists and parses.
fn read_pid(path: &Path) -> Option<i32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Whether a process with `pid` exists (signal 0 probe).
fn process_alive(pid: i32) -> bool {
    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM and friends mean the pid exists but is not ours.
        Err(_) => true,
    }
}
