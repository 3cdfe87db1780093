//! Configuration loading and data-folder paths.
//!
//! Handles paths and persistence for:
//! - the data folder pointer (`~/.config/timetracker/config`)
//! - optional tuning knobs (`~/.config/timetracker/settings.toml`)
//! - the files every component derives from the data folder
//!
//! Core components never decide where the data folder lives; they receive a
//! [`DataPaths`] built by the front end.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, TrackerError};
use crate::lock::LockPolicy;

const DB_FILE: &str = ".timetrack.db";
const CACHE_FILE: &str = ".app_state.json";
const CACHE_LOCK_FILE: &str = ".app_state.lock";
const CHIME_LOCK_FILE: &str = ".chime.lock";
const EXPORT_FILE: &str = "time_entries.csv";

/// Returns the tracker config directory (~/.config/timetracker).
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".config").join("timetracker"))
}

/// Returns the file holding the chosen data folder path.
pub fn get_data_folder_pointer_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("config"))
}

pub fn get_settings_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("settings.toml"))
}

pub fn get_custom_activities_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("custom_activities"))
}

/// Resolves the data folder: explicit override, then the pointer file, then
/// `~/Documents/TimeTracker` (which is recorded in the pointer file). The folder is
/// created if missing.
pub fn resolve_data_folder(explicit: Option<&Path>) -> Result<PathBuf> {
    let folder = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let pointer =
                get_data_folder_pointer_path().ok_or(TrackerError::DataFolderUnavailable)?;
            resolve_from_pointer(&pointer)?
        }
    };

    fs_err::create_dir_all(&folder)
        .map_err(|err| TrackerError::io("Failed to create data folder", err))?;
    Ok(folder)
}

fn resolve_from_pointer(pointer: &Path) -> Result<PathBuf> {
    match fs_err::read_to_string(pointer) {
        Ok(content) if !content.trim().is_empty() => {
            let folder = PathBuf::from(content.trim());
            debug!(folder = %folder.display(), "Data folder from pointer file");
            Ok(folder)
        }
        Ok(_) => write_default_pointer(pointer),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => write_default_pointer(pointer),
        Err(err) => Err(TrackerError::io("Failed to read data folder pointer", err)),
    }
}

fn write_default_pointer(pointer: &Path) -> Result<PathBuf> {
    let folder = dirs::home_dir()
        .ok_or(TrackerError::DataFolderUnavailable)?
        .join("Documents")
        .join("TimeTracker");

    if let Some(parent) = pointer.parent() {
        fs_err::create_dir_all(parent)
            .map_err(|err| TrackerError::io("Failed to create config directory", err))?;
    }
    fs_err::write(pointer, folder.to_string_lossy().as_bytes())
        .map_err(|err| TrackerError::io("Failed to write data folder pointer", err))?;
    info!(folder = %folder.display(), "First run: using default data folder");
    Ok(folder)
}

/// Every file the tracker keeps in one data folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
    pub database: PathBuf,
    pub cache: PathBuf,
    pub cache_lock: PathBuf,
    pub chime_lock: PathBuf,
    pub export: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        DataPaths {
            database: root.join(DB_FILE),
            cache: root.join(CACHE_FILE),
            cache_lock: root.join(CACHE_LOCK_FILE),
            chime_lock: root.join(CHIME_LOCK_FILE),
            export: root.join(EXPORT_FILE),
            root,
        }
    }
}

/// Tuning knobs. Every field has a default; `settings.toml` may override any subset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub sync_interval_secs: u64,
    pub tick_interval_ms: u64,
    pub chime_interval_secs: i64,
    /// How long the chime dedup lock is held after ringing. Best-effort dedup, not a
    /// correctness guarantee.
    pub chime_dead_time_ms: u64,
    pub export_interval_secs: u64,
    pub lock_retry_ms: u64,
    pub lock_timeout_ms: u64,
    /// Program and arguments used to play the chime. `None` rings the terminal bell.
    pub chime_command: Option<Vec<String>>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        TrackerSettings {
            sync_interval_secs: 2,
            tick_interval_ms: 1000,
            chime_interval_secs: 360,
            chime_dead_time_ms: 2000,
            export_interval_secs: 30,
            lock_retry_ms: 100,
            lock_timeout_ms: 5000,
            chime_command: None,
        }
    }
}

impl TrackerSettings {
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            retry: Duration::from_millis(self.lock_retry_ms.max(1)),
            timeout: Duration::from_millis(self.lock_timeout_ms),
        }
    }

    pub fn chime_dead_time(&self) -> Duration {
        Duration::from_millis(self.chime_dead_time_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Loads settings from `path` (or the default location). A missing file yields defaults.
pub fn load_settings(path: Option<PathBuf>) -> Result<TrackerSettings> {
    let settings_path = match path.or_else(get_settings_path) {
        Some(path) => path,
        None => return Ok(TrackerSettings::default()),
    };

    if !settings_path.exists() {
        return Ok(TrackerSettings::default());
    }

    let content = fs_err::read_to_string(&settings_path)
        .map_err(|err| TrackerError::io("Failed to read settings", err))?;
    toml::from_str::<TrackerSettings>(&content).map_err(|err| TrackerError::ConfigMalformed {
        path: settings_path.clone(),
        details: err.to_string(),
    })
}
