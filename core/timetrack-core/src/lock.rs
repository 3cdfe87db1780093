//! Advisory file locks shared between tracker processes.
//!
//! A lock is a zero-byte file in the data folder; the OS-level exclusive lock on its
//! handle is the only thing that matters. Locks are cooperative and non-reentrant: a
//! second handle opened by the same process conflicts with the first, which is what lets
//! tests model two processes with two [`AdvisoryLock`]s on one path.
//!
//! Two acquisition styles:
//! - [`AdvisoryLock::acquire`] retries on a fixed sleep until a deadline (cache writes).
//! - [`AdvisoryLock::try_acquire`] makes one attempt (chime dedup).

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::{Result, TrackerError};

/// Retry policy for blocking acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub retry: Duration,
    pub timeout: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy {
            retry: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdvisoryLock {
    path: PathBuf,
}

/// Holds the lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl AdvisoryLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AdvisoryLock { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One non-blocking attempt. `Ok(None)` means another holder has it.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        let file = self.open_handle()?;
        if !lock_taken(FileExt::try_lock_exclusive(&file), &self.path)? {
            return Ok(None);
        }
        trace!(path = %self.path.display(), "Lock acquired");
        Ok(Some(LockGuard {
            file,
            path: self.path.clone(),
        }))
    }

    /// Retries every `policy.retry` until `policy.timeout`, then fails with `LockTimeout`.
    pub fn acquire(&self, policy: LockPolicy) -> Result<LockGuard> {
        let start = Instant::now();
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }

            let waited = start.elapsed();
            if waited >= policy.timeout {
                debug!(
                    path = %self.path.display(),
                    waited_ms = waited.as_millis() as u64,
                    "Lock acquisition timed out"
                );
                return Err(TrackerError::LockTimeout {
                    path: self.path.clone(),
                    waited_ms: waited.as_millis() as u64,
                });
            }

            thread::sleep(policy.retry.min(policy.timeout - waited));
        }
    }

    fn open_handle(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| TrackerError::io("Failed to create lock directory", err))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|err| {
                TrackerError::io(format!("Failed to open lock file {}", self.path.display()), err)
            })
    }
}

/// Contention reads as `false`; any other locking failure is an error.
fn lock_taken(attempt: std::io::Result<bool>, path: &Path) -> Result<bool> {
    match attempt {
        Ok(taken) => Ok(taken),
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Lock attempt failed");
            Err(TrackerError::io(format!("Failed to lock {}", path.display()), err))
        }
    }
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        trace!(path = %self.path.display(), "Lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_policy() -> LockPolicy {
        LockPolicy {
            retry: Duration::from_millis(10),
            timeout: Duration::from_millis(60),
        }
    }

    #[test]
    fn second_handle_cannot_take_held_lock() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join(".app_state.lock");
        let first = AdvisoryLock::new(&path);
        let second = AdvisoryLock::new(&path);

        let guard = first.try_acquire().expect("try").expect("free lock");
        assert!(second.try_acquire().expect("try").is_none());

        drop(guard);
        assert!(second.try_acquire().expect("try").is_some());
    }

    #[test]
    fn blocking_acquire_times_out_while_held() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join(".app_state.lock");
        let holder = AdvisoryLock::new(&path);
        let _guard = holder.try_acquire().expect("try").expect("free lock");

        let err = AdvisoryLock::new(&path)
            .acquire(short_policy())
            .expect_err("should time out");
        assert!(matches!(err, TrackerError::LockTimeout { .. }));
        assert!(err.is_skippable());
    }

    #[test]
    fn blocking_acquire_succeeds_once_released() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join(".app_state.lock");
        let holder = AdvisoryLock::new(&path);
        let guard = holder.try_acquire().expect("try").expect("free lock");

        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            AdvisoryLock::new(waiter_path)
                .acquire(LockPolicy {
                    retry: Duration::from_millis(10),
                    timeout: Duration::from_secs(2),
                })
                .is_ok()
        });

        thread::sleep(Duration::from_millis(50));
        drop(guard);
        assert!(waiter.join().expect("join"));
    }

    #[test]
    fn contention_reads_as_not_taken() {
        let path = Path::new("/tmp/.chime.lock");
        let would_block = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        assert!(!lock_taken(Err(would_block), path).expect("contention"));
        assert!(!lock_taken(Ok(false), path).expect("held"));
        assert!(lock_taken(Ok(true), path).expect("taken"));
    }

    #[test]
    fn other_lock_failures_surface_as_io_errors() {
        let path = Path::new("/mnt/share/.chime.lock");
        let unsupported = std::io::Error::from(std::io::ErrorKind::Unsupported);
        let err = lock_taken(Err(unsupported), path).expect_err("should fail");
        assert!(matches!(err, TrackerError::Io { .. }));
        assert!(!err.is_skippable());
        assert!(err.to_string().contains("/mnt/share/.chime.lock"));
    }

    #[test]
    fn creates_missing_parent_directory() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("nested").join(".chime.lock");
        let guard = AdvisoryLock::new(&path)
            .try_acquire()
            .expect("try")
            .expect("free lock");
        assert!(guard.path().exists());
    }
}
