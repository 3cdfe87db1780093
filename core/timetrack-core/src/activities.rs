//! Activity classifications offered when starting or editing a session.
//!
//! The catalog is the fixed default list followed by user-added custom activities,
//! which persist one per line in `~/.config/timetracker/custom_activities`.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{Result, TrackerError};

/// Used for open rows written before the activity column existed.
pub const DEFAULT_ACTIVITY: &str = "Legal research";

pub const DEFAULT_ACTIVITIES: &[&str] = &[
    DEFAULT_ACTIVITY,
    "Investigation",
    "Discovery Review",
    "File Review",
    "Client Communication",
];

pub struct ActivityCatalog {
    custom: Vec<String>,
    file_path: Option<PathBuf>,
}

impl ActivityCatalog {
    pub fn new_in_memory() -> Self {
        ActivityCatalog {
            custom: Vec::new(),
            file_path: None,
        }
    }

    /// Reads custom activities from `file_path`. Missing or unreadable files yield an
    /// empty custom list.
    pub fn load(file_path: &Path) -> Self {
        let custom = match fs_err::read_to_string(file_path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                warn!(error = %err, "Failed to read custom activities");
                Vec::new()
            }
        };

        ActivityCatalog {
            custom,
            file_path: Some(file_path.to_path_buf()),
        }
    }

    /// Defaults first, then custom activities in the order they were added.
    pub fn all(&self) -> Vec<String> {
        DEFAULT_ACTIVITIES
            .iter()
            .map(|activity| activity.to_string())
            .chain(self.custom.iter().cloned())
            .collect()
    }

    pub fn custom(&self) -> &[String] {
        &self.custom
    }

    /// Records a custom activity. Returns `false` when it was already known.
    pub fn add(&mut self, activity: &str) -> Result<bool> {
        let activity = activity.trim();
        if activity.is_empty() {
            return Err(TrackerError::InvalidInput {
                field: "activity",
                reason: "must not be empty".to_string(),
            });
        }
        if DEFAULT_ACTIVITIES.contains(&activity) || self.custom.iter().any(|a| a == activity) {
            return Ok(false);
        }

        self.custom.push(activity.to_string());
        self.save()?;
        Ok(true)
    }

    fn save(&self) -> Result<()> {
        let Some(file_path) = self.file_path.as_ref() else {
            return Ok(());
        };
        let parent = match file_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs_err::create_dir_all(parent)
            .map_err(|err| TrackerError::io("Failed to create config directory", err))?;

        let mut content = String::new();
        for activity in &self.custom {
            content.push_str(activity);
            content.push('\n');
        }

        let mut temp_file = NamedTempFile::new_in(parent)
            .map_err(|err| TrackerError::io("Failed to create temp activities file", err))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| TrackerError::io("Failed to write custom activities", err))?;
        temp_file
            .flush()
            .map_err(|err| TrackerError::io("Failed to flush custom activities", err))?;
        temp_file
            .persist(file_path)
            .map_err(|err| TrackerError::io("Failed to replace custom activities", err.error))?;

        Ok(())
    }
}
