//! Cross-process authorization lock
//!
//! An advisory file lock serializing interactive authorization flows for one
//! server across all local proxy processes. The lock file holds a JSON
//! [`LockRecord`] identifying the holder, so a waiting process can tell a
//! live holder from the residue of a crashed one.
//!
//! Staleness has two triggers: the holder PID is no longer alive, or the
//! record's age exceeds the configured limit (covering PID reuse and holders
//! wedged inside an interactive flow). Stale locks are reclaimed by deleting
//! the file and retrying acquisition.
//!
//! Release happens on every exit path: [`LockGuard`] removes the file when
//! dropped, and [`LockGuard::release`] offers an explicit, error-reporting
//! variant for the orderly case.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TetherError};

/// The contents of a lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// PID of the process that acquired the lock.
    pub holder_pid: u32,
    /// UTC time of acquisition.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub acquired_at: DateTime<Utc>,
}

/// Advisory cross-process lock backed by a lock file.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use mcp_tether::auth::lock::FlowLock;
///
/// # fn main() -> anyhow::Result<()> {
/// let lock = FlowLock::new("/tmp/example.lock", Duration::from_secs(600));
/// if let Some(guard) = lock.try_acquire()? {
///     // ... run the interactive flow ...
///     guard.release()?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FlowLock {
    path: PathBuf,
    stale_after: Duration,
}

impl FlowLock {
    /// Creates a lock handle for the given path.
    ///
    /// `stale_after` bounds how long a holder may keep the lock before other
    /// processes are allowed to reclaim it, covering holders stuck in an
    /// interactive wait.
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Returns `Ok(Some(guard))` on success and `Ok(None)` when another
    /// live process holds the lock. A stale lock (dead holder or age beyond
    /// the limit) is reclaimed, after which acquisition is retried once.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Lock`] on I/O failures other than the
    /// already-held case.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        match self.create_lock_file() {
            Ok(()) => Ok(Some(LockGuard {
                path: self.path.clone(),
                armed: true,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if self.holder_is_stale()? {
                    tracing::debug!(path = %self.path.display(), "reclaiming stale authorization lock");
                    // Another waiter may reclaim concurrently; losing that
                    // race shows up as AlreadyExists on the retry, which is
                    // reported as ordinary contention.
                    let _ = std::fs::remove_file(&self.path);
                    match self.create_lock_file() {
                        Ok(()) => Ok(Some(LockGuard {
                            path: self.path.clone(),
                            armed: true,
                        })),
                        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
                        Err(e) => {
                            Err(TetherError::Lock(format!("failed to reacquire lock: {e}")).into())
                        }
                    }
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(TetherError::Lock(format!(
                "failed to create lock file {}: {e}",
                self.path.display()
            ))
            .into()),
        }
    }

    /// Reads the current lock record, if the file exists and parses.
    pub fn read_record(&self) -> Result<Option<LockRecord>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(record) => Ok(Some(record)),
                // An unparseable lock file is treated as stale residue.
                Err(_) => Ok(None),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TetherError::Lock(format!(
                "failed to read lock file {}: {e}",
                self.path.display()
            ))
            .into()),
        }
    }

    /// Creates the lock file exclusively and writes this process's record.
    fn create_lock_file(&self) -> std::io::Result<()> {
        use std::io::Write as _;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;

        let record = LockRecord {
            holder_pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// `true` when the recorded holder is dead, too old, or unreadable.
    fn holder_is_stale(&self) -> Result<bool> {
        let Some(record) = self.read_record()? else {
            // Missing (raced with a release) or garbage: treat as stale so
            // acquisition can proceed.
            return Ok(true);
        };

        if !pid_alive(record.holder_pid) {
            return Ok(true);
        }

        let age = Utc::now().signed_duration_since(record.acquired_at);
        // Absurdly large configured durations just mean "never stale by age".
        let limit = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(365_000));
        Ok(age > limit)
    }
}

/// RAII guard for an acquired [`FlowLock`]. Removes the lock file when
/// dropped; use [`release`](Self::release) to surface removal errors.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    armed: bool,
}

impl LockGuard {
    /// Releases the lock, reporting any failure to remove the file.
    pub fn release(mut self) -> Result<()> {
        self.armed = false;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TetherError::Lock(format!(
                "failed to release lock {}: {e}",
                self.path.display()
            ))
            .into()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Probes whether a process with the given PID is alive.
///
/// On Unix this sends signal 0; `EPERM` counts as alive (the process exists
/// but belongs to another user). On other platforms liveness cannot be
/// probed cheaply, so the age limit alone governs staleness.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 performs only a permission/existence check.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}
