//! Turn countdown
//!
//! Every session runs its own [`TurnTimer`]. The session owning the current
//! player counts down against its wall clock and emits a [`TimePulse`] about
//! once a second; other sessions snap to those pulses, correcting for transit
//! time. All time comes from an injected [`Clock`].

use super::TurnTag;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Fine tick period
pub const TICK_INTERVAL_MS: u64 = 100;

/// Owner pulse period
pub const PULSE_INTERVAL_MS: u64 = 1000;

/// Missed pulses before a non-owner starts counting down on its own
pub const STALE_PULSES: u64 = 3;

/// Source of wall-clock time in milliseconds
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Clock shared between the timer and the session that drives it
pub type SharedClock = Rc<dyn Clock>;

/// Milliseconds since the Unix epoch
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for deterministic tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
    now: std::cell::Cell<u64>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: std::cell::Cell::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// A named, cancellable periodic activity.
///
/// Does not run anything itself; the event loop asks it whether it is due.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    name: &'static str,
    period_ms: u64,
    next_due_ms: Option<u64>,
}

impl PeriodicTask {
    pub fn new(name: &'static str, period_ms: u64) -> Self {
        Self {
            name,
            period_ms,
            next_due_ms: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// (Re)start the task; first due one period after `now_ms`
    pub fn start(&mut self, now_ms: u64) {
        self.next_due_ms = Some(now_ms + self.period_ms);
    }

    pub fn cancel(&mut self) {
        self.next_due_ms = None;
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.next_due_ms.is_some()
    }

    /// Returns true at most once per call when the task is due.
    ///
    /// Missed periods are not replayed: the next due time is measured from
    /// `now_ms`.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        match self.next_due_ms {
            Some(due) if now_ms >= due => {
                self.next_due_ms = Some(now_ms + self.period_ms);
                true
            }
            _ => false,
        }
    }
}

/// Remaining time as sent by the turn owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePulse {
    pub remaining_ms: u64,
    /// Sender's wall clock when the pulse was built
    pub sent_at_ms: u64,
    pub tag: TurnTag,
}

/// Countdown snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    /// Never negative
    pub remaining_ms: u64,
    /// Wall-clock time at which `remaining_ms` was accurate
    pub accurate_at_ms: u64,
    pub is_owner: bool,
}

/// Result of a timer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTick {
    /// Not counting down
    Idle,
    /// Counting down; remaining milliseconds
    Running(u64),
    /// Reached zero on this tick. The timer has stopped.
    Expired,
}

/// Per-session countdown for the current turn
pub struct TurnTimer {
    clock: SharedClock,
    state: TimerState,
    tag: Option<TurnTag>,
    running: bool,
    tick_task: PeriodicTask,
    pulse_task: PeriodicTask,
    /// Local time of the last accepted pulse (or the start)
    last_sync_ms: u64,
}

impl TurnTimer {
    #[cfg(test)]
    pub fn new(clock: SharedClock) -> Self {
        Self::with_intervals(clock, TICK_INTERVAL_MS, PULSE_INTERVAL_MS)
    }

    pub fn with_intervals(clock: SharedClock, tick_ms: u64, pulse_ms: u64) -> Self {
        Self {
            clock,
            state: TimerState {
                remaining_ms: 0,
                accurate_at_ms: 0,
                is_owner: false,
            },
            tag: None,
            running: false,
            tick_task: PeriodicTask::new("turn-tick", tick_ms),
            pulse_task: PeriodicTask::new("time-pulse", pulse_ms),
            last_sync_ms: 0,
        }
    }

    /// Start counting down a turn. Restarts both periodic tasks.
    pub fn start(&mut self, tag: TurnTag, duration_ms: u64, is_owner: bool) {
        let now = self.clock.now_ms();
        self.state = TimerState {
            remaining_ms: duration_ms,
            accurate_at_ms: now,
            is_owner,
        };
        self.tag = Some(tag);
        self.running = true;
        self.last_sync_ms = now;

        self.tick_task.start(now);
        if is_owner {
            self.pulse_task.start(now);
        } else {
            self.pulse_task.cancel();
        }
        debug!(
            round = tag.round,
            player = tag.player_index,
            duration_ms,
            is_owner,
            "turn timer started"
        );
    }

    /// Stop counting. The last remaining value is kept for display.
    pub fn stop(&mut self) {
        if self.running {
            debug!("turn timer stopped");
        }
        self.running = false;
        self.tick_task.cancel();
        self.pulse_task.cancel();
    }

    /// Advance the countdown if the fine tick is due.
    pub fn tick(&mut self) -> TimerTick {
        if !self.running {
            return TimerTick::Idle;
        }
        let now = self.clock.now_ms();
        if !self.tick_task.poll(now) {
            return TimerTick::Running(self.state.remaining_ms);
        }

        if self.state.is_owner || self.pulses_stale(now) {
            self.settle(now);
        }

        if self.state.remaining_ms == 0 {
            self.stop();
            TimerTick::Expired
        } else {
            TimerTick::Running(self.state.remaining_ms)
        }
    }

    /// Build a pulse if this session owns the turn and one is due
    pub fn poll_pulse(&mut self) -> Option<TimePulse> {
        if !self.running || !self.state.is_owner {
            return None;
        }
        let now = self.clock.now_ms();
        if !self.pulse_task.poll(now) {
            return None;
        }
        self.settle(now);
        Some(TimePulse {
            remaining_ms: self.state.remaining_ms,
            sent_at_ms: now,
            tag: self.tag?,
        })
    }

    /// Resynchronize from an owner pulse. Returns false if the pulse was
    /// dropped (not running, we are the owner, or the tag is stale).
    pub fn apply_pulse(&mut self, pulse: &TimePulse) -> bool {
        if !self.running || self.state.is_owner {
            return false;
        }
        if self.tag != Some(pulse.tag) {
            debug!(
                round = pulse.tag.round,
                player = pulse.tag.player_index,
                "dropping pulse for another turn"
            );
            return false;
        }

        let now = self.clock.now_ms();
        let transit = now.saturating_sub(pulse.sent_at_ms);
        self.state.remaining_ms = pulse.remaining_ms.saturating_sub(transit);
        self.state.accurate_at_ms = now;
        self.last_sync_ms = now;
        true
    }

    fn settle(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.state.accurate_at_ms);
        self.state.remaining_ms = self.state.remaining_ms.saturating_sub(elapsed);
        self.state.accurate_at_ms = now;
    }

    fn pulses_stale(&self, now: u64) -> bool {
        now.saturating_sub(self.last_sync_ms) > STALE_PULSES * self.pulse_task.period_ms()
    }

    /// Whether a non-owner has stopped hearing from the owner
    pub fn is_free_running(&self) -> bool {
        self.running && !self.state.is_owner && self.pulses_stale(self.clock.now_ms())
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn remaining_ms(&self) -> u64 {
        self.state.remaining_ms
    }

    /// Remaining whole seconds, rounded up
    pub fn remaining_secs(&self) -> u64 {
        self.state.remaining_ms.div_ceil(1000)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_owner(&self) -> bool {
        self.state.is_owner
    }

    pub fn tag(&self) -> Option<TurnTag> {
        self.tag
    }
}
