//! Error types for timetrack-core operations.
//!
//! Write-path failures (`Storage`, `Conflict`) are surfaced to the user. Everything a
//! tick loop can hit (`LockTimeout`, `Parse`, `Playback`) is logged and skipped by the
//! caller; see [`TrackerError::is_skippable`].

use std::path::PathBuf;

/// All errors that can occur in timetrack-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    // ─────────────────────────────────────────────────────────────────────
    // Session Store
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("A session is already open (id {open_id})")]
    Conflict { open_id: i64 },

    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Locks, cache and chimes
    // ─────────────────────────────────────────────────────────────────────
    #[error("Timed out after {waited_ms}ms waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("Unparseable timestamp {value:?}: {reason}")]
    Parse { value: String, reason: String },

    #[error("Chime playback failed: {details}")]
    Playback { details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Could not determine a data folder (no home directory)")]
    DataFolderUnavailable,

    // ─────────────────────────────────────────────────────────────────────
    // I/O
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("CSV error: {context}: {source}")]
    Csv {
        context: String,
        #[source]
        source: csv::Error,
    },
}

impl TrackerError {
    pub(crate) fn storage(context: impl Into<String>, source: rusqlite::Error) -> Self {
        TrackerError::Storage {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TrackerError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for failures a tick loop should log and retry on the next tick.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            TrackerError::LockTimeout { .. }
                | TrackerError::Parse { .. }
                | TrackerError::Playback { .. }
        )
    }
}

/// Convenience type alias for Results using TrackerError.
pub type Result<T> = std::result::Result<T, TrackerError>;
