//! Advisory cross-process locking via lock files.
//!
//! Mutual exclusion between cooperating processes on the same filesystem:
//! `<resource>.lock` is created with `create_new` (atomic on POSIX and
//! Windows), and contenders poll until the holder removes it. Advisory only —
//! an uncooperative writer is not stopped.
//!
//! A process killed while holding the lock leaves the lock file behind; there
//! is no liveness channel between independent solver invocations, so a lock
//! file older than [`LockOptions::stale_after`] is treated as abandoned and
//! broken. Locks are held only around state read/modify/persist, never across
//! a solver run, so a healthy holder's lock is always young.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for lock {}", path.display())]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Tuning for lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Sleep between acquisition attempts.
    pub poll_interval: Duration,
    /// A lock file older than this is considered abandoned and is broken.
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Exclusive hold on a resource. Released explicitly or on drop.
#[derive(Debug)]
pub struct LockHandle {
    lock_path: PathBuf,
    held: bool,
}

/// Lock file path for a resource (sibling `<name>.lock`).
pub fn lock_path_for(resource: &Path) -> PathBuf {
    let mut name = resource
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "resource".into());
    name.push(".lock");
    resource.with_file_name(name)
}

/// Acquire the exclusive lock on `resource` with default options.
pub fn acquire(resource: &Path, timeout: Duration) -> Result<LockHandle, LockError> {
    acquire_with(resource, timeout, LockOptions::default())
}

/// Acquire the exclusive lock on `resource`, blocking the calling process
/// until the lock is obtained or `timeout` elapses.
pub fn acquire_with(
    resource: &Path,
    timeout: Duration,
    options: LockOptions,
) -> Result<LockHandle, LockError> {
    let lock_path = lock_path_for(resource);
    let deadline = Instant::now() + timeout;

    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                // Holder pid, for post-mortem inspection of abandoned locks.
                let _ = write!(file, "{}", std::process::id());
                debug!(path = %lock_path.display(), "lock acquired");
                return Ok(LockHandle {
                    lock_path,
                    held: true,
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if break_if_stale(&lock_path, options.stale_after)? {
                    continue;
                }
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: lock_path,
                    source,
                });
            }
        }

        if Instant::now() >= deadline {
            return Err(LockError::Timeout {
                path: lock_path,
                timeout,
            });
        }
        thread::sleep(options.poll_interval);
    }
}

/// Remove the lock file if its mtime is older than `stale_after`.
///
/// Returns true if the lock was broken and acquisition should retry at once.
/// Races with the holder's own release are fine: a missing file at any step
/// just means the lock was freed normally.
fn break_if_stale(lock_path: &Path, stale_after: Duration) -> Result<bool, LockError> {
    let metadata = match std::fs::metadata(lock_path) {
        Ok(m) => m,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(source) => {
            return Err(LockError::Io {
                path: lock_path.to_path_buf(),
                source,
            });
        }
    };
    let age = metadata
        .modified()
        .ok()
        .and_then(|mtime| mtime.elapsed().ok());
    let Some(age) = age else {
        return Ok(false);
    };
    if age <= stale_after {
        return Ok(false);
    }

    warn!(path = %lock_path.display(), age_secs = age.as_secs(), "breaking stale lock");
    match std::fs::remove_file(lock_path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(source) => Err(LockError::Io {
            path: lock_path.to_path_buf(),
            source,
        }),
    }
}

impl LockHandle {
    /// Release the lock. Idempotent: releasing an already-released handle is
    /// a no-op, so failure-path double-release is harmless.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        if let Err(err) = std::fs::remove_file(&self.lock_path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.lock_path.display(), err = %err, "failed to remove lock file");
        }
        debug!(path = %self.lock_path.display(), "lock released");
    }
}

impl Drop for LockHandle {
    // Backstop so every exit path of a critical section releases, including
    // errors raised while the section is active.
    fn drop(&mut self) {
        self.release();
    }
}
