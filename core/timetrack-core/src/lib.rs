//! # timetrack-core
//!
//! Session state synchronization for a local time tracker whose front ends run as
//! independent processes sharing one data folder.
//!
//! ## Architecture
//!
//! ```text
//! any process ──write──▶ SessionStore (SQLite, authoritative)
//!                             │ poll
//!                             ▼
//!                        Synchronizer ──▶ SyncView (per process) ──▶ ChimeSchedule
//!                             │                                        │
//!                             ▼                                        ▼
//!                   .app_state.json (advisory)                 ChimeGate (.chime.lock)
//! ```
//!
//! - **Store** ([`store`]): single conditional statements keep at most one open row.
//! - **Synchronizer** ([`sync`]): classifies transitions and rewrites the cache.
//! - **Chimes** ([`chime`]): edge and boundary cues, deduplicated across processes.
//! - **Export** ([`export`]): full CSV projection, recomputed on demand.
//!
//! Everything is synchronous. The cache is a read optimization only; no decision is
//! made from it.

pub mod activities;
pub mod cache;
pub mod chime;
pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod lock;
pub mod store;
pub mod sync;
pub mod timestamp;
pub mod tracker;
pub mod watch;

pub use activities::{ActivityCatalog, DEFAULT_ACTIVITIES, DEFAULT_ACTIVITY};
pub use cache::{CacheFile, CacheSnapshot};
pub use chime::{
    player_from_settings, ChimeCue, ChimeGate, ChimeOutcome, ChimePlayer, ChimeSchedule, Chimer,
    CommandChime, TerminalBell,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_settings, resolve_data_folder, DataPaths, TrackerSettings};
pub use error::{Result, TrackerError};
pub use export::{
    format_duration, project_sessions, summarize_by_project, ProjectSummary, ProjectedSession,
    Projection,
};
pub use lock::{AdvisoryLock, LockGuard, LockPolicy};
pub use store::{OpenSession, SessionPatch, SessionRecord, SessionStore, HIDDEN_PROJECT_PREFIX};
pub use sync::{classify, SyncView, Synchronizer, Transition};
pub use timestamp::StoredTime;
pub use tracker::{SyncTick, Tracker};
pub use watch::{IntervalTicks, ManualTicks, TickSource, WatchPlan, WatchSummary};
