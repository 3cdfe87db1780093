//! The per-process tick loop.
//!
//! Each tick advances the chime schedule; every `sync_every` seconds it also runs a
//! synchronizer pass, and every `export_every` seconds a full re-export. Nothing that
//! happens inside a tick stops the loop; only the [`TickSource`] does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::chime::ChimeOutcome;
use crate::clock::{Clock, ManualClock};
use crate::config::TrackerSettings;
use crate::tracker::Tracker;

/// Paces the loop. Returning `false` ends it.
pub trait TickSource {
    fn wait(&mut self) -> bool;
}

/// Real sleeps on a fixed cadence, until the stop flag is raised.
pub struct IntervalTicks {
    interval: Duration,
    next: Instant,
    stop: Arc<AtomicBool>,
}

impl IntervalTicks {
    pub fn new(interval: Duration, stop: Arc<AtomicBool>) -> Self {
        IntervalTicks {
            interval,
            next: Instant::now() + interval,
            stop,
        }
    }
}

impl TickSource for IntervalTicks {
    fn wait(&mut self) -> bool {
        if self.stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        } else {
            // Overran a tick; resync instead of bursting to catch up.
            self.next = now;
        }
        self.next += self.interval;
        !self.stop.load(Ordering::SeqCst)
    }
}

/// Advances a [`ManualClock`] per tick, for a fixed number of ticks.
pub struct ManualTicks {
    clock: Arc<ManualClock>,
    step_secs: i64,
    remaining: usize,
}

impl ManualTicks {
    pub fn new(clock: Arc<ManualClock>, step_secs: i64, ticks: usize) -> Self {
        ManualTicks {
            clock,
            step_secs,
            remaining: ticks,
        }
    }
}

impl TickSource for ManualTicks {
    fn wait(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.clock.advance(self.step_secs);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchPlan {
    pub sync_every: i64,
    pub export_every: i64,
}

impl WatchPlan {
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        WatchPlan {
            sync_every: settings.sync_interval_secs.max(1) as i64,
            export_every: settings.export_interval_secs.max(1) as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub ticks: u64,
    pub syncs: u64,
    pub exports: u64,
    pub chimes: u64,
    pub failures: u64,
}

pub fn run<C: Clock, T: TickSource>(
    tracker: &mut Tracker<C>,
    plan: &WatchPlan,
    ticks: &mut T,
) -> WatchSummary {
    let mut summary = WatchSummary::default();
    let mut last_sync: Option<i64> = None;
    let mut last_export: Option<i64> = None;

    info!(
        sync_every = plan.sync_every,
        export_every = plan.export_every,
        "Watch loop started"
    );

    loop {
        let now = tracker.now();

        if is_due(last_sync, now, plan.sync_every) {
            last_sync = Some(now);
            summary.syncs += 1;
            match tracker.sync_tick() {
                Ok(tick) => {
                    if tick.transition.is_edge() {
                        info!(transition = tick.transition.as_str(), "Session state changed");
                    }
                    if tick.chime == Some(ChimeOutcome::Played) {
                        summary.chimes += 1;
                    }
                }
                Err(err) => {
                    summary.failures += 1;
                    warn!(error = %err, skippable = err.is_skippable(), "Sync tick failed");
                }
            }
        }

        if tracker.chime_tick() == Some(ChimeOutcome::Played) {
            summary.chimes += 1;
            debug!(now, "Boundary chime");
        }

        if is_due(last_export, now, plan.export_every) {
            last_export = Some(now);
            summary.exports += 1;
            if let Err(err) = tracker.export() {
                summary.failures += 1;
                warn!(error = %err, "Periodic export failed");
            }
        }

        summary.ticks += 1;
        if !ticks.wait() {
            break;
        }
    }

    info!(ticks = summary.ticks, chimes = summary.chimes, "Watch loop stopped");
    summary
}

/// A clock that moved backwards counts as due.
fn is_due(last: Option<i64>, now: i64, every: i64) -> bool {
    match last {
        None => true,
        Some(last) => now < last || now - last >= every,
    }
}
