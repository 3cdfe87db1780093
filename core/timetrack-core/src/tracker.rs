//! Operation layer shared by every front end.
//!
//! Writes go straight to the Session Store. Only after the store confirms a write does
//! the tracker refresh its view (from the store, never the cache), rewrite the cache,
//! ring the edge chime and re-export. A failed write returns its error and leaves the
//! view as it was.

use std::path::PathBuf;
use tracing::{info, warn};

use crate::cache::{CacheFile, CacheSnapshot};
use crate::chime::{ChimeOutcome, Chimer};
use crate::clock::Clock;
use crate::config::{DataPaths, TrackerSettings};
use crate::error::{Result, TrackerError};
use crate::export::{export_store, Projection};
use crate::store::{OpenSession, SessionPatch, SessionStore};
use crate::sync::{SyncView, Synchronizer, Transition};

/// Result of one synchronizer pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTick {
    pub transition: Transition,
    pub chime: Option<ChimeOutcome>,
}

pub struct Tracker<C: Clock> {
    sync: Synchronizer<C>,
    chimer: Option<Chimer>,
    export_path: PathBuf,
}

impl<C: Clock> Tracker<C> {
    /// Opens the store in `paths` and primes the view with one synchronizer pass, so a
    /// session already running is discovered rather than announced.
    pub fn open(
        paths: &DataPaths,
        settings: &TrackerSettings,
        clock: C,
        chimer: Option<Chimer>,
    ) -> Result<Self> {
        let store = SessionStore::open(&paths.database)?;
        let cache = CacheFile::new(paths, settings.lock_policy());
        let mut tracker = Tracker {
            sync: Synchronizer::new(store, cache, clock),
            chimer,
            export_path: paths.export.clone(),
        };
        tracker.sync_tick()?;
        Ok(tracker)
    }

    pub fn store(&self) -> &SessionStore {
        self.sync.store()
    }

    pub fn view(&self) -> &SyncView {
        self.sync.current_view()
    }

    pub fn now(&self) -> i64 {
        self.sync.clock().now()
    }

    /// Opens a session starting now. Fails with `Conflict` if one is already open.
    pub fn start(&mut self, project: &str, activity: &str) -> Result<OpenSession> {
        let project = require_label("project", project)?;
        let activity = require_label("activity", activity)?;
        let start_time = self.now();

        let id = self.store().open_session(project, activity, start_time)?;
        self.after_write();

        Ok(OpenSession {
            id,
            project: project.to_string(),
            activity: activity.to_string(),
            start_time,
        })
    }

    /// Seals the open session. Returns 0 when nothing was open.
    pub fn stop(&mut self) -> Result<usize> {
        let end_time = self.now();
        let sealed = self.store().close_open_session(end_time)?;
        self.after_write();
        Ok(sealed)
    }

    /// Relabels the open session's activity in place.
    pub fn change_activity(&mut self, activity: &str) -> Result<usize> {
        let activity = require_label("activity", activity)?;
        self.mutate(SessionPatch {
            project: None,
            activity: Some(activity.to_string()),
        })
    }

    /// Moves the open session to another project in place, keeping its start time.
    pub fn change_project(&mut self, project: &str, activity: Option<&str>) -> Result<usize> {
        let project = require_label("project", project)?;
        let activity = activity
            .map(|value| require_label("activity", value))
            .transpose()?;
        self.mutate(SessionPatch {
            project: Some(project.to_string()),
            activity: activity.map(str::to_string),
        })
    }

    /// Seals the open session now and starts a new one for `project`.
    ///
    /// Two atomic writes; if another process starts a session in between, the second
    /// write fails with `Conflict` and the first stays committed.
    pub fn switch_project(&mut self, project: &str, activity: &str) -> Result<OpenSession> {
        let project = require_label("project", project)?;
        let activity = require_label("activity", activity)?;
        let now = self.now();

        self.store().close_open_session(now)?;
        let opened = self.store().open_session(project, activity, now);
        self.after_write();
        let id = opened?;

        info!(id, project, "Switched project");
        Ok(OpenSession {
            id,
            project: project.to_string(),
            activity: activity.to_string(),
            start_time: now,
        })
    }

    /// Distinct project labels, most recently used first.
    pub fn projects(&self, include_hidden: bool) -> Result<Vec<String>> {
        self.store().list_distinct_projects(!include_hidden)
    }

    /// Refreshes from the store and returns the open session, if any.
    pub fn status(&mut self) -> Result<Option<OpenSession>> {
        self.sync_tick()?;
        Ok(self.view().open_session().cloned())
    }

    /// The last cache snapshot, without touching the store.
    pub fn cached_status(&self) -> Result<Option<CacheSnapshot>> {
        self.sync.cache().read()
    }

    /// One synchronizer pass, routed to the chime schedule.
    pub fn sync_tick(&mut self) -> Result<SyncTick> {
        let transition = self.sync.tick()?;
        let now = self.now();
        let chime = self
            .chimer
            .as_mut()
            .and_then(|chimer| chimer.on_transition(&transition, now));
        Ok(SyncTick { transition, chime })
    }

    /// Advances the boundary schedule to the current second.
    pub fn chime_tick(&mut self) -> Option<ChimeOutcome> {
        let now = self.now();
        self.chimer.as_mut()?.on_tick(now)
    }

    pub fn export(&self) -> Result<Projection> {
        export_store(self.store(), &self.export_path, self.now())
    }

    /// Holds a chime lock taken by this process for its full dead time. Call before a
    /// short-lived process exits.
    pub fn finish(&mut self) {
        if let Some(chimer) = self.chimer.as_mut() {
            chimer.wait_out();
        }
    }

    fn mutate(&mut self, patch: SessionPatch) -> Result<usize> {
        let updated = self.store().mutate_open_session(&patch)?;
        self.after_write();
        Ok(updated)
    }

    fn after_write(&mut self) {
        if let Err(err) = self.sync_tick() {
            warn!(error = %err, "Failed to refresh view after write");
        }
        if let Err(err) = self.export() {
            warn!(error = %err, "Export failed");
        }
    }
}

fn require_label<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::InvalidInput {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(trimmed)
}
