//! Workspace-level mutex lock file: the changeset log, lock
//! subsystem, and workspace-mode flag are guarded by this exclusive file
//! lock for the duration of any state-changing operation. Concurrent
//! invocations either wait (with a timeout) or fail fast with
//! `WorkspaceBusy`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hashing::atomic_write_json;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
    pub operation: String,
}

fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join("workspace.lock")
}

pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Attempts to acquire immediately; fails with `WorkspaceBusy` if held.
    pub fn acquire(state_dir: &Path, operation: &str) -> Result<Self> {
        Self::acquire_with_timeout(state_dir, operation, Duration::ZERO)
    }

    /// Waits up to `timeout` for the lock to free up (polling), then fails
    /// with `WorkspaceBusy`. A `timeout` of zero means "fail immediately if
    /// held", matching `--locked`/non-blocking callers.
    pub fn acquire_with_timeout(
        state_dir: &Path,
        operation: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let path = lock_path(state_dir);
        let deadline = Instant::now() + timeout;

        loop {
            match read_lock_info(&path) {
                Some(info) if !is_stale(&info) => {
                    if Instant::now() >= deadline {
                        return Err(Error::WorkspaceBusy {
                            pid: info.pid,
                            host: info.host,
                            since: info.acquired_at.to_rfc3339(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                _ => {
                    let info = LockInfo {
                        pid: std::process::id(),
                        host: gethostname::gethostname().to_string_lossy().to_string(),
                        acquired_at: Utc::now(),
                        operation: operation.to_string(),
                    };
                    atomic_write_json(&path, &info)?;
                    return Ok(WorkspaceLock { path });
                }
            }
        }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_lock_info(path: &Path) -> Option<LockInfo> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// A lock is considered stale (and therefore stealable) after one hour with
/// no release — guards against a crashed process wedging the workspace
/// forever.
fn is_stale(info: &LockInfo) -> bool {
    Utc::now().signed_duration_since(info.acquired_at) > chrono::Duration::hours(1)
}
