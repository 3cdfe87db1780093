//! Reconciles the Session Store into each process's view and the shared cache.
//!
//! Every process polls independently. A tick is split into a pure part and an I/O part:
//!
//! 1. read the open row from the store (authoritative)
//! 2. [`classify`] it against the process's [`SyncView`] and [`SyncView::apply`] the
//!    resulting [`Transition`] to get the next view
//! 3. rewrite the cache snapshot under the cache lock, whether or not anything changed
//!
//! The view remembers the `start_time` of the last session this process notified for.
//! That is what separates "a session just started" from "this process just launched
//! and found a session already running": the first observation only primes the view.

use tracing::{debug, info, warn};

use crate::cache::{CacheFile, CacheSnapshot};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::{to_open_session, OpenSession, SessionStore};

/// One process's remembered state. Immutable; each tick produces a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncView {
    primed: bool,
    open: Option<OpenSession>,
    last_notified_start: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    /// First observation of a session that was already running. Never notifies.
    Discovered(OpenSession),
    /// A session started since the last observation.
    Opened(OpenSession),
    /// Project or activity of the open session changed.
    Updated(OpenSession),
    Closed,
}

impl Transition {
    /// Start/stop edges, the only transitions that warrant an immediate notification.
    pub fn is_edge(&self) -> bool {
        matches!(self, Transition::Opened(_) | Transition::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Unchanged => "unchanged",
            Transition::Discovered(_) => "discovered",
            Transition::Opened(_) => "opened",
            Transition::Updated(_) => "updated",
            Transition::Closed => "closed",
        }
    }
}

impl SyncView {
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub fn is_tracking(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_session(&self) -> Option<&OpenSession> {
        self.open.as_ref()
    }

    pub fn last_notified_start(&self) -> Option<i64> {
        self.last_notified_start
    }

    pub fn apply(&self, transition: &Transition) -> SyncView {
        match transition {
            Transition::Unchanged => SyncView {
                primed: true,
                ..self.clone()
            },
            Transition::Discovered(session) | Transition::Opened(session) => SyncView {
                primed: true,
                open: Some(session.clone()),
                last_notified_start: Some(session.start_time),
            },
            Transition::Updated(session) => SyncView {
                primed: true,
                open: Some(session.clone()),
                last_notified_start: self.last_notified_start,
            },
            Transition::Closed => SyncView {
                primed: true,
                open: None,
                last_notified_start: self.last_notified_start,
            },
        }
    }
}

/// Classifies an observed store state against `view`.
pub fn classify(view: &SyncView, observed: Option<&OpenSession>) -> Transition {
    if !view.primed {
        return match observed {
            Some(session) => Transition::Discovered(session.clone()),
            None => Transition::Unchanged,
        };
    }

    match (view.open.as_ref(), observed) {
        (None, None) => Transition::Unchanged,
        (Some(_), None) => Transition::Closed,
        (None, Some(session)) => Transition::Opened(session.clone()),
        (Some(known), Some(session)) => {
            if known.id != session.id || view.last_notified_start != Some(session.start_time) {
                Transition::Opened(session.clone())
            } else if known.project != session.project || known.activity != session.activity {
                Transition::Updated(session.clone())
            } else {
                Transition::Unchanged
            }
        }
    }
}

/// Drives ticks for one process: owns the store handle, the cache file and the view.
pub struct Synchronizer<C: Clock> {
    store: SessionStore,
    cache: CacheFile,
    clock: C,
    view: SyncView,
}

impl<C: Clock> Synchronizer<C> {
    pub fn new(store: SessionStore, cache: CacheFile, clock: C) -> Self {
        Synchronizer {
            store,
            cache,
            clock,
            view: SyncView::default(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn cache(&self) -> &CacheFile {
        &self.cache
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn current_view(&self) -> &SyncView {
        &self.view
    }

    /// Reads the store, advances the view and rewrites the cache.
    ///
    /// Store and parse failures propagate and leave the view untouched. A cache write
    /// failure is logged and the transition is still returned.
    pub fn tick(&mut self) -> Result<Transition> {
        let observed = self
            .store
            .get_open_session()?
            .as_ref()
            .map(to_open_session)
            .transpose()?;

        let transition = classify(&self.view, observed.as_ref());
        self.view = self.view.apply(&transition);

        match &transition {
            Transition::Unchanged => {}
            Transition::Discovered(session) => {
                info!(id = session.id, project = %session.project, "Discovered running session")
            }
            other => debug!(transition = other.as_str(), "Session state changed"),
        }

        let snapshot = CacheSnapshot::from_open(observed.as_ref(), self.clock.now());
        if let Err(err) = self.cache.write(&snapshot) {
            if err.is_skippable() {
                debug!(error = %err, "Skipped cache write this tick");
            } else {
                warn!(error = %err, "Failed to write cache snapshot");
            }
        }

        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DataPaths;
    use crate::lock::LockPolicy;

    fn session(id: i64, start_time: i64) -> OpenSession {
        OpenSession {
            id,
            project: "Acme".to_string(),
            activity: "Research".to_string(),
            start_time,
        }
    }

    fn run(view: &mut SyncView, observed: Option<&OpenSession>) -> Transition {
        let transition = classify(view, observed);
        *view = view.apply(&transition);
        transition
    }

    #[test]
    fn classifies_open_close_sequence() {
        let t1 = session(1, 1_000);
        let t2 = session(2, 5_000);
        let mut view = SyncView::default();

        assert_eq!(run(&mut view, None), Transition::Unchanged);
        assert_eq!(run(&mut view, Some(&t1)), Transition::Opened(t1.clone()));
        assert_eq!(run(&mut view, Some(&t1)), Transition::Unchanged);
        assert_eq!(run(&mut view, None), Transition::Closed);
        assert_eq!(run(&mut view, Some(&t2)), Transition::Opened(t2.clone()));
    }

    #[test]
    fn first_read_of_running_session_is_discovery() {
        let t1 = session(1, 1_000);
        let mut view = SyncView::default();

        let first = run(&mut view, Some(&t1));
        assert_eq!(first, Transition::Discovered(t1.clone()));
        assert!(!first.is_edge());
        assert_eq!(view.last_notified_start(), Some(1_000));
        assert_eq!(run(&mut view, Some(&t1)), Transition::Unchanged);
    }

    #[test]
    fn new_start_time_without_seeing_close_is_opened() {
        let mut view = SyncView::default();
        run(&mut view, Some(&session(1, 1_000)));

        let replacement = session(2, 1_600);
        assert_eq!(
            run(&mut view, Some(&replacement)),
            Transition::Opened(replacement)
        );
    }

    #[test]
    fn project_edit_is_update_not_edge() {
        let mut view = SyncView::default();
        run(&mut view, None);
        run(&mut view, Some(&session(1, 1_000)));

        let mut edited = session(1, 1_000);
        edited.project = "Globex".to_string();
        let transition = run(&mut view, Some(&edited));
        assert_eq!(transition, Transition::Updated(edited.clone()));
        assert!(!transition.is_edge());
        assert_eq!(view.open_session(), Some(&edited));
    }

    #[test]
    fn apply_does_not_mutate_previous_view() {
        let view = SyncView::default();
        let next = view.apply(&Transition::Opened(session(1, 10)));
        assert!(!view.is_primed());
        assert!(!view.is_tracking());
        assert!(next.is_tracking());
    }

    #[test]
    fn tick_reads_store_and_writes_cache() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let paths = DataPaths::new(temp_dir.path());
        let store = SessionStore::open(&paths.database).expect("store");
        let cache = CacheFile::new(&paths, LockPolicy::default());
        let mut sync = Synchronizer::new(store, cache, ManualClock::new(2_000));

        assert_eq!(sync.tick().expect("tick"), Transition::Unchanged);
        let idle = sync.cache().read().expect("read").expect("snapshot");
        assert!(!idle.is_tracking);

        sync.store()
            .open_session("Acme", "Research", 1_900)
            .expect("open");
        let transition = sync.tick().expect("tick");
        assert!(matches!(transition, Transition::Opened(ref s) if s.start_time == 1_900));

        let snapshot = sync.cache().read().expect("read").expect("snapshot");
        assert!(snapshot.is_tracking);
        assert_eq!(snapshot.project.as_deref(), Some("Acme"));
        assert_eq!(snapshot.start_time, Some(1_900));
        assert_eq!(snapshot.last_updated, 2_000);
    }

    #[test]
    fn tick_survives_held_cache_lock() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let paths = DataPaths::new(temp_dir.path());
        let store = SessionStore::open(&paths.database).expect("store");
        let cache = CacheFile::new(
            &paths,
            LockPolicy {
                retry: std::time::Duration::from_millis(5),
                timeout: std::time::Duration::from_millis(20),
            },
        );
        let _held = crate::lock::AdvisoryLock::new(&paths.cache_lock)
            .try_acquire()
            .expect("try")
            .expect("free lock");

        store.open_session("Acme", "Research", 100).expect("open");
        let mut sync = Synchronizer::new(store, cache, ManualClock::new(200));
        assert!(matches!(sync.tick().expect("tick"), Transition::Discovered(_)));
        assert!(sync.current_view().is_tracking());
        assert!(!paths.cache.exists());
    }
}
