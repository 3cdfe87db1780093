//! File-backed snapshot of the open-session state.
//!
//! The snapshot (`.app_state.json` in the data folder) is a read optimization for UIs
//! that want status without opening the database. It is never authoritative: the
//! synchronizer rewrites it wholesale from the Session Store on every tick, and any
//! process may delete it.
//!
//! # File Format
//!
//! ```json
//! {
//!   "is_tracking": true,
//!   "project": "Acme",
//!   "activity": "Legal research",
//!   "start_time": 1700000000,
//!   "last_updated": 1700000042
//! }
//! ```
//!
//! Writes hold the cache advisory lock and go through temp file + rename so readers
//! never see a partial file. Reads take no lock.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::config::DataPaths;
use crate::error::{Result, TrackerError};
use crate::lock::{AdvisoryLock, LockPolicy};
use crate::store::OpenSession;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub is_tracking: bool,
    pub project: Option<String>,
    pub activity: Option<String>,
    pub start_time: Option<i64>,
    /// Diagnostics only; never used to order snapshots.
    #[serde(default)]
    pub last_updated: i64,
}

impl CacheSnapshot {
    pub fn from_open(open: Option<&OpenSession>, now: i64) -> Self {
        match open {
            Some(session) => CacheSnapshot {
                is_tracking: true,
                project: Some(session.project.clone()),
                activity: Some(session.activity.clone()),
                start_time: Some(session.start_time),
                last_updated: now,
            },
            None => CacheSnapshot {
                is_tracking: false,
                project: None,
                activity: None,
                start_time: None,
                last_updated: now,
            },
        }
    }

    /// Seconds between `last_updated` and `now`.
    pub fn age(&self, now: i64) -> i64 {
        now.saturating_sub(self.last_updated)
    }
}

pub struct CacheFile {
    path: PathBuf,
    lock: AdvisoryLock,
    policy: LockPolicy,
}

impl CacheFile {
    pub fn new(paths: &DataPaths, policy: LockPolicy) -> Self {
        CacheFile {
            path: paths.cache.clone(),
            lock: AdvisoryLock::new(&paths.cache_lock),
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrites the snapshot under the cache lock. Fails with `LockTimeout` when the
    /// lock stays busy past the policy timeout; callers treat that as a skipped write.
    pub fn write(&self, snapshot: &CacheSnapshot) -> Result<()> {
        let _guard = self.lock.acquire(self.policy)?;

        let content = serde_json::to_string_pretty(snapshot).map_err(|source| TrackerError::Json {
            context: "Failed to serialize cache snapshot".to_string(),
            source,
        })?;

        let parent_dir = self.path.parent().ok_or_else(|| {
            TrackerError::io(
                "Cache path has no parent directory",
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })?;
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|err| TrackerError::io("Failed to create temp cache file", err))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| TrackerError::io("Failed to write temp cache file", err))?;
        temp_file
            .flush()
            .map_err(|err| TrackerError::io("Failed to flush temp cache file", err))?;
        temp_file
            .persist(&self.path)
            .map_err(|err| TrackerError::io("Failed to replace cache file", err.error))?;

        Ok(())
    }

    /// Reads the snapshot without locking. Missing, empty or corrupt files read as `None`.
    pub fn read(&self) -> Result<Option<CacheSnapshot>> {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(TrackerError::io("Failed to read cache file", err)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<CacheSnapshot>(&content) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                warn!(error = %err, path = %self.path.display(), "Ignoring corrupt cache snapshot");
                Ok(None)
            }
        }
    }
}
