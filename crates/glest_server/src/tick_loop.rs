//! Wall-clock driven tick loop.
//!
//! The simulation runs on its own thread, one tick every
//! `1 / (ticks_per_second × game_speed)` seconds. A late tick runs the next
//! one immediately; once the loop is more than `max_queued_ticks` behind,
//! the excess is dropped and reported as a `SlowTick` event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use glest_core::command::CommandSubmission;
use glest_core::config::{GameConfig, GameSpeed};
use glest_core::error::CommandError;
use glest_core::simulation::{ReplyTicket, Simulation};
use glest_core::view::{SharedView, WorldSnapshot};

use crate::{Result, ServerError};

type Inbound = (CommandSubmission, Option<ReplyTicket>);

/// Pacing parameters for a [`TickLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Wall-clock time between ticks.
    pub period: Duration,
    /// Ticks the loop may fall behind before dropping.
    pub max_queued_ticks: u32,
}

impl LoopSettings {
    /// Settings for a tick rate and game speed.
    #[must_use]
    pub fn new(ticks_per_second: u32, speed: GameSpeed, max_queued_ticks: u32) -> Self {
        let per_hundred_seconds = u64::from(ticks_per_second.max(1)) * u64::from(speed.percent());
        Self {
            period: Duration::from_nanos(100_000_000_000 / per_hundred_seconds.max(1)),
            max_queued_ticks,
        }
    }

    /// Settings from a game config.
    #[must_use]
    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.ticks_per_second, config.game_speed, config.max_queued_ticks)
    }
}

/// What the loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pace {
    /// On schedule; wait this long.
    Sleep(Duration),
    /// Behind; run the next tick now.
    Immediate,
    /// Too far behind; this many ticks were skipped.
    Dropped(u64),
}

/// Deadline bookkeeping, separate from the clock so it can be tested.
#[derive(Debug, Clone)]
pub(crate) struct Pacer {
    period: Duration,
    max_queued: u64,
    next: Instant,
}

impl Pacer {
    pub(crate) fn new(settings: LoopSettings, start: Instant) -> Self {
        Self {
            period: settings.period,
            max_queued: u64::from(settings.max_queued_ticks),
            next: start,
        }
    }

    /// Advance the deadline by one period and decide how to proceed at `now`.
    pub(crate) fn schedule(&mut self, now: Instant) -> Pace {
        self.next += self.period;
        if now < self.next {
            return Pace::Sleep(self.next - now);
        }
        let period = self.period.as_nanos().max(1);
        let behind = u64::try_from((now - self.next).as_nanos() / period).unwrap_or(u64::MAX);
        if behind <= self.max_queued {
            return Pace::Immediate;
        }
        let dropped = behind - self.max_queued;
        self.next += self
            .period
            .saturating_mul(u32::try_from(dropped).unwrap_or(u32::MAX));
        Pace::Dropped(dropped)
    }
}

/// A simulation running on a dedicated thread.
///
/// Event subscriptions must be registered on the [`Simulation`] before it
/// is handed to [`TickLoop::start`]; handlers then run on the tick thread.
#[derive(Debug)]
pub struct TickLoop {
    inbox: mpsc::Sender<Inbound>,
    view: SharedView,
    stop: Arc<AtomicBool>,
    worker: JoinHandle<Simulation>,
}

impl TickLoop {
    /// Move `simulation` onto a new thread and start ticking.
    ///
    /// # Errors
    ///
    /// [`ServerError::Spawn`] if the thread cannot be created.
    pub fn start(simulation: Simulation, settings: LoopSettings) -> Result<Self> {
        let (inbox, rx) = mpsc::channel();
        let view = simulation.shared_view();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("glest-tick".into())
            .spawn(move || run(simulation, &rx, &flag, settings))?;
        tracing::info!(period_us = settings.period.as_micros(), "tick loop started");
        Ok(Self {
            inbox,
            view,
            stop,
            worker,
        })
    }

    /// Queue a submission for the next tick.
    pub fn submit(&self, submission: CommandSubmission) {
        if self.inbox.send((submission, None)).is_err() {
            tracing::warn!("tick thread gone; submission dropped");
        }
    }

    /// Queue a submission; its outcome arrives on the returned receiver once
    /// the tick that drains it runs.
    pub fn submit_with_reply(
        &self,
        submission: CommandSubmission,
    ) -> mpsc::Receiver<std::result::Result<(), CommandError>> {
        let (reply, outcome) = mpsc::channel();
        if self.inbox.send((submission, Some(reply))).is_err() {
            tracing::warn!("tick thread gone; submission dropped");
        }
        outcome
    }

    /// Handle for other threads to submit through.
    #[must_use]
    pub fn submitter(&self) -> Submitter {
        Submitter {
            inbox: self.inbox.clone(),
        }
    }

    /// Last committed snapshot.
    #[must_use]
    pub fn view(&self) -> Arc<WorldSnapshot> {
        self.view.load()
    }

    /// Shared view handle for reader threads.
    #[must_use]
    pub fn shared_view(&self) -> SharedView {
        self.view.clone()
    }

    /// Whether the tick thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Let the in-flight tick finish, then hand the simulation back.
    ///
    /// Submissions that arrived after the last tick stay pending on the
    /// returned simulation.
    ///
    /// # Errors
    ///
    /// [`ServerError::WorkerPanicked`] if the tick thread panicked.
    pub fn stop(self) -> Result<Simulation> {
        self.stop.store(true, Ordering::Release);
        let simulation = self.worker.join().map_err(|_| ServerError::WorkerPanicked)?;
        tracing::info!(tick = simulation.get_tick(), "tick loop stopped");
        Ok(simulation)
    }
}

/// Cloneable submission handle.
#[derive(Debug, Clone)]
pub struct Submitter {
    inbox: mpsc::Sender<Inbound>,
}

impl Submitter {
    /// Queue a submission for the next tick. Returns `false` once the loop
    /// has stopped.
    pub fn submit(&self, submission: CommandSubmission) -> bool {
        self.inbox.send((submission, None)).is_ok()
    }
}

fn drain(simulation: &mut Simulation, rx: &mpsc::Receiver<Inbound>) {
    while let Ok((submission, reply)) = rx.try_recv() {
        match reply {
            Some(reply) => simulation.submit_with_reply(submission, reply),
            None => simulation.submit(submission),
        }
    }
}

fn run(
    mut simulation: Simulation,
    rx: &mpsc::Receiver<Inbound>,
    stop: &AtomicBool,
    settings: LoopSettings,
) -> Simulation {
    let mut pacer = Pacer::new(settings, Instant::now());
    while !stop.load(Ordering::Acquire) {
        drain(&mut simulation, rx);
        simulation.tick();

        match pacer.schedule(Instant::now()) {
            Pace::Sleep(wait) => thread::sleep(wait),
            Pace::Immediate => {}
            Pace::Dropped(dropped) => simulation.report_slow_tick(dropped),
        }
    }
    drain(&mut simulation, rx);
    simulation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LoopSettings {
        LoopSettings {
            period: Duration::from_millis(10),
            max_queued_ticks: 5,
        }
    }

    #[test]
    fn test_period_follows_speed() {
        let normal = LoopSettings::new(60, GameSpeed::Normal, 5);
        assert_eq!(normal.period, Duration::from_nanos(16_666_666));
        let fastest = LoopSettings::new(60, GameSpeed::Fastest, 5);
        assert_eq!(fastest.period, Duration::from_nanos(5_555_555));
        let slowest = LoopSettings::new(40, GameSpeed::Slowest, 5);
        assert_eq!(slowest.period, Duration::from_millis(100));
    }

    #[test]
    fn test_on_time_ticks_sleep_out_the_period() {
        let start = Instant::now();
        let mut pacer = Pacer::new(settings(), start);
        assert_eq!(
            pacer.schedule(start + Duration::from_millis(3)),
            Pace::Sleep(Duration::from_millis(7))
        );
        assert_eq!(pacer.schedule(start + Duration::from_millis(20)), Pace::Immediate);
    }

    #[test]
    fn test_late_ticks_catch_up_then_drop() {
        let start = Instant::now();
        let mut pacer = Pacer::new(settings(), start);
        assert_eq!(pacer.schedule(start + Duration::from_millis(25)), Pace::Immediate);
        // Deadline is now 20ms; 200ms is 18 periods behind.
        assert_eq!(
            pacer.schedule(start + Duration::from_millis(200)),
            Pace::Dropped(13)
        );
        assert_eq!(pacer.schedule(start + Duration::from_millis(200)), Pace::Immediate);
    }
}
