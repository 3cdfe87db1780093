//! Several "processes" (threads with their own connections, locks and views) sharing
//! one data folder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use timetrack_core::{
    AdvisoryLock, ChimeGate, ChimeOutcome, ChimePlayer, DataPaths, ManualClock, Result,
    SessionStore, Tracker, TrackerError, TrackerSettings, Transition,
};

#[derive(Clone, Default)]
struct Counter(Arc<AtomicUsize>);

impl ChimePlayer for Counter {
    fn play(&self) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn concurrent_writers_never_leave_two_open_sessions() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let db_path = temp_dir.path().join(".timetrack.db");
    SessionStore::open(&db_path).expect("init store");

    const WRITERS: usize = 6;
    const ROUNDS: i64 = 25;
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let db_path = db_path.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let store = SessionStore::open(&db_path).expect("store");
                barrier.wait();
                let mut opened = 0usize;
                for round in 0..ROUNDS {
                    let now = round * 10 + writer as i64;
                    match store.open_session(&format!("writer-{writer}"), "Research", now) {
                        Ok(_) => opened += 1,
                        Err(TrackerError::Conflict { .. }) => {}
                        Err(err) => panic!("unexpected open failure: {err}"),
                    }
                    assert!(store.count_open_sessions().expect("count") <= 1);
                    if round % 2 == 1 {
                        store.close_open_session(now + 1).expect("close");
                    }
                }
                opened
            })
        })
        .collect();

    let total_opened: usize = handles
        .into_iter()
        .map(|handle| handle.join().expect("writer thread"))
        .sum();

    let store = SessionStore::open(&db_path).expect("store");
    assert!(store.count_open_sessions().expect("count") <= 1);
    let sessions = store.list_all_sessions().expect("list");
    assert_eq!(sessions.len(), total_opened);
    assert!(sessions.iter().filter(|s| s.is_open()).count() <= 1);
}

#[test]
fn two_gates_ringing_together_play_once() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let lock_path = DataPaths::new(temp_dir.path()).chime_lock;
    let player = Counter::default();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let lock_path = lock_path.clone();
            let player = player.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut gate =
                    ChimeGate::new(AdvisoryLock::new(lock_path), Duration::from_millis(500));
                barrier.wait();
                let outcome = gate.try_ring(&player, Instant::now()).expect("ring");
                // Keep the gate (and its held lock) alive until both have tried.
                thread::sleep(Duration::from_millis(300));
                outcome
            })
        })
        .collect();

    let outcomes: Vec<ChimeOutcome> = handles
        .into_iter()
        .map(|handle| handle.join().expect("gate thread"))
        .collect();

    assert_eq!(player.0.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|outcome| **outcome == ChimeOutcome::Played)
            .count(),
        1
    );
}

#[test]
fn observer_sees_start_stop_start_sequence() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let paths = DataPaths::new(temp_dir.path());
    let settings = TrackerSettings::default();
    let clock = Arc::new(ManualClock::new(1_000));

    let mut observer = Tracker::open(&paths, &settings, clock.clone(), None).expect("observer");
    let mut writer = Tracker::open(&paths, &settings, clock.clone(), None).expect("writer");

    let mut seen = Vec::new();
    let first = writer.start("Acme", "Research").expect("start");
    seen.push(observer.sync_tick().expect("tick").transition);
    clock.advance(2);
    seen.push(observer.sync_tick().expect("tick").transition);
    writer.stop().expect("stop");
    seen.push(observer.sync_tick().expect("tick").transition);
    clock.advance(60);
    let second = writer.start("Acme", "Research").expect("start");
    seen.push(observer.sync_tick().expect("tick").transition);

    assert_eq!(
        seen,
        vec![
            Transition::Opened(first),
            Transition::Unchanged,
            Transition::Closed,
            Transition::Opened(second),
        ]
    );
}
