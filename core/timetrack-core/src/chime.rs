//! Chime scheduling and cross-process dedup.
//!
//! Two independent pieces:
//! - [`ChimeSchedule`] decides *when*: an immediate cue on start/stop edges and a
//!   periodic cue each time elapsed tracking time crosses a multiple of the interval.
//! - [`ChimeGate`] decides *whether this process rings*: a non-blocking attempt on the
//!   shared chime lock, held for a dead time after ringing so that other processes
//!   reaching the same boundary find it busy and stay quiet.
//!
//! Dedup is best-effort. With a dead time close to the poll interval, unlucky
//! scheduling can still produce a double chime.

use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{DataPaths, TrackerSettings};
use crate::error::{Result, TrackerError};
use crate::lock::{AdvisoryLock, LockGuard};
use crate::sync::Transition;

/// Renders a chime. Failures are reported but never change tracking state.
pub trait ChimePlayer: Send {
    fn play(&self) -> Result<()>;
}

/// Writes BEL to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBell;

impl ChimePlayer for TerminalBell {
    fn play(&self) -> Result<()> {
        use std::io::Write;
        let mut stderr = std::io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|err| TrackerError::Playback {
                details: err.to_string(),
            })
    }
}

/// Runs an external program (e.g. `paplay bell.oga`) and waits for it.
#[derive(Debug, Clone)]
pub struct CommandChime {
    program: String,
    args: Vec<String>,
}

impl CommandChime {
    /// `None` when `command` is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(CommandChime {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl ChimePlayer for CommandChime {
    fn play(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .map_err(|err| TrackerError::Playback {
                details: format!("{}: {}", self.program, err),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(TrackerError::Playback {
                details: format!("{} exited with {}", self.program, status),
            })
        }
    }
}

pub fn player_from_settings(settings: &TrackerSettings) -> Box<dyn ChimePlayer> {
    match settings.chime_command.as_deref().and_then(CommandChime::new) {
        Some(command) => Box::new(command),
        None => Box::new(TerminalBell),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChimeCue {
    /// Session started or stopped.
    Edge,
    /// Elapsed time crossed a multiple of the interval.
    Boundary { elapsed: i64 },
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    start_time: i64,
    last_index: i64,
}

/// Per-process boundary tracking.
///
/// Fires when `(now - start_time) / interval` moves past the last index seen, which
/// with one-second ticks is exactly the seconds where `elapsed % interval == 0`, and
/// still fires once if a tick is late. Boundaries already passed when the schedule
/// arms are not replayed, and elapsed 0 never fires.
#[derive(Debug, Clone)]
pub struct ChimeSchedule {
    interval: i64,
    armed: Option<Armed>,
}

impl ChimeSchedule {
    pub fn new(interval_secs: i64) -> Self {
        ChimeSchedule {
            interval: interval_secs.max(1),
            armed: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Arms or disarms on a synchronizer transition; returns an edge cue for
    /// `Opened`/`Closed`.
    pub fn on_transition(&mut self, transition: &Transition, now: i64) -> Option<ChimeCue> {
        match transition {
            Transition::Unchanged => None,
            Transition::Opened(session) => {
                self.arm(session.start_time, now);
                Some(ChimeCue::Edge)
            }
            Transition::Discovered(session) | Transition::Updated(session) => {
                if self.armed.map(|armed| armed.start_time) != Some(session.start_time) {
                    self.arm(session.start_time, now);
                }
                None
            }
            Transition::Closed => {
                self.armed = None;
                Some(ChimeCue::Edge)
            }
        }
    }

    pub fn on_tick(&mut self, now: i64) -> Option<ChimeCue> {
        let interval = self.interval;
        let armed = self.armed.as_mut()?;
        let elapsed = now - armed.start_time;
        if elapsed <= 0 {
            return None;
        }

        let index = elapsed / interval;
        if index > armed.last_index {
            armed.last_index = index;
            return Some(ChimeCue::Boundary { elapsed });
        }
        None
    }

    fn arm(&mut self, start_time: i64, now: i64) {
        let elapsed = (now - start_time).max(0);
        self.armed = Some(Armed {
            start_time,
            last_index: elapsed / self.interval,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChimeOutcome {
    Played,
    /// Another process (or this one, within its dead time) holds the chime lock.
    Suppressed,
}

/// Cross-process chime dedup via a held advisory lock.
pub struct ChimeGate {
    lock: AdvisoryLock,
    dead_time: Duration,
    held: Option<(LockGuard, Instant)>,
}

impl ChimeGate {
    pub fn new(lock: AdvisoryLock, dead_time: Duration) -> Self {
        ChimeGate {
            lock,
            dead_time,
            held: None,
        }
    }

    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    /// One attempt to ring. Playback errors are logged; the lock is held for the dead
    /// time either way.
    pub fn try_ring(&mut self, player: &dyn ChimePlayer, now: Instant) -> Result<ChimeOutcome> {
        self.release_expired(now);
        if self.held.is_some() {
            return Ok(ChimeOutcome::Suppressed);
        }

        let Some(guard) = self.lock.try_acquire()? else {
            debug!(path = %self.lock.path().display(), "Chime lock busy, skipping");
            return Ok(ChimeOutcome::Suppressed);
        };

        if let Err(err) = player.play() {
            warn!(error = %err, "Chime playback failed");
        }
        self.held = Some((guard, now + self.dead_time));
        Ok(ChimeOutcome::Played)
    }

    /// Drops the guard once its dead time has passed.
    pub fn release_expired(&mut self, now: Instant) {
        if matches!(self.held, Some((_, until)) if now >= until) {
            self.held = None;
        }
    }

    /// Blocks until the dead time has passed, then releases. For short-lived processes
    /// that would otherwise drop the lock on exit.
    pub fn wait_out(&mut self) {
        if let Some((guard, until)) = self.held.take() {
            let now = Instant::now();
            if until > now {
                std::thread::sleep(until - now);
            }
            drop(guard);
        }
    }
}

/// Schedule, gate and player for one process.
pub struct Chimer {
    schedule: ChimeSchedule,
    gate: ChimeGate,
    player: Box<dyn ChimePlayer>,
}

impl Chimer {
    pub fn new(schedule: ChimeSchedule, gate: ChimeGate, player: Box<dyn ChimePlayer>) -> Self {
        Chimer {
            schedule,
            gate,
            player,
        }
    }

    /// Chime lock in the data folder, interval and dead time from `settings`.
    pub fn from_settings(
        paths: &DataPaths,
        settings: &TrackerSettings,
        player: Box<dyn ChimePlayer>,
    ) -> Self {
        Chimer::new(
            ChimeSchedule::new(settings.chime_interval_secs),
            ChimeGate::new(AdvisoryLock::new(&paths.chime_lock), settings.chime_dead_time()),
            player,
        )
    }

    pub fn schedule(&self) -> &ChimeSchedule {
        &self.schedule
    }

    pub fn on_transition(&mut self, transition: &Transition, now: i64) -> Option<ChimeOutcome> {
        let cue = self.schedule.on_transition(transition, now)?;
        self.ring(cue)
    }

    pub fn on_tick(&mut self, now: i64) -> Option<ChimeOutcome> {
        self.gate.release_expired(Instant::now());
        let cue = self.schedule.on_tick(now)?;
        self.ring(cue)
    }

    pub fn wait_out(&mut self) {
        self.gate.wait_out();
    }

    fn ring(&mut self, cue: ChimeCue) -> Option<ChimeOutcome> {
        match self.gate.try_ring(self.player.as_ref(), Instant::now()) {
            Ok(outcome) => {
                debug!(?cue, ?outcome, "Chime");
                Some(outcome)
            }
            Err(err) => {
                warn!(error = %err, ?cue, "Chime lock unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts plays; optionally fails every play.
    #[derive(Clone, Default)]
    pub struct CountingPlayer {
        pub plays: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl CountingPlayer {
        pub fn count(&self) -> usize {
            self.plays.load(Ordering::SeqCst)
        }
    }

    impl ChimePlayer for CountingPlayer {
        fn play(&self) -> Result<()> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TrackerError::Playback {
                    details: "no audio device".to_string(),
                });
            }
            Ok(())
        }
    }
}
