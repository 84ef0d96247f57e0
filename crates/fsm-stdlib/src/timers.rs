//! Cycle timers.
//!
//! A [`Timer`] behaves like the IEC 61131-3 on-delay timer (TON) driven by
//! the scan cycle: while running, every tick adds the cycle duration to the
//! elapsed time, and the timer expires once elapsed reaches the preset.
//!
//! Rounding rule: `elapsed += cycle` on every tick and expiry is checked
//! with `elapsed >= preset`. When the cycle duration does not divide the
//! preset evenly, expiry happens on the first tick that reaches or passes
//! the preset, i.e. up to one cycle late. The reported elapsed time is
//! clamped to the preset, like `ET` of a TON.
//!
//! The [`TimerService`] owns every timer of one controller. Timers are
//! never shared between controllers.
//!
//! # Timing Diagram
//!
//! ```text
//!          start                         stop
//! running  ---+==========================+------
//!
//!                          preset
//! expired  ----------------+=============+------
//!
//!                 /--------+
//! elapsed  ------/          \____________\______
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// Index of a timer inside its [`TimerService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerId(u16);

impl TimerId {
    /// Position in the service.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single on-delay cycle timer.
///
/// # Example
///
/// ```
/// use fsm_stdlib::timers::Timer;
/// use std::time::Duration;
///
/// let mut t = Timer::new(Duration::from_millis(250));
/// t.start();
/// assert_eq!(t.tick(Duration::from_millis(100)), (Duration::from_millis(100), false));
/// assert_eq!(t.tick(Duration::from_millis(100)), (Duration::from_millis(200), false));
/// // 300ms >= 250ms: expired, one cycle of overshoot, elapsed clamped
/// assert_eq!(t.tick(Duration::from_millis(100)), (Duration::from_millis(250), true));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timer {
    /// Configured duration.
    preset: Duration,
    /// Accumulated time while running.
    elapsed: Duration,
    /// Accumulating.
    running: bool,
    /// Sticky expiry flag for the current run.
    expired: bool,
}

impl Timer {
    /// Create a stopped timer with the given preset.
    #[must_use]
    pub fn new(preset: Duration) -> Self {
        Self {
            preset,
            ..Self::default()
        }
    }

    /// Start the timer from zero. Starting a running timer is a no-op.
    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.elapsed = Duration::ZERO;
            self.expired = false;
        }
    }

    /// Start with a new preset. The preset is only applied when the timer
    /// was not already running.
    pub fn start_with(&mut self, preset: Duration) {
        if !self.running {
            self.preset = preset;
            self.start();
        }
    }

    /// Stop the timer and discard elapsed time and expiry.
    pub fn stop(&mut self) {
        self.running = false;
        self.elapsed = Duration::ZERO;
        self.expired = false;
    }

    /// Advance by one cycle.
    ///
    /// # Returns
    ///
    /// A tuple of (elapsed, expired). A stopped timer does not accumulate.
    pub fn tick(&mut self, cycle: Duration) -> (Duration, bool) {
        if self.running {
            self.elapsed = self.elapsed.saturating_add(cycle).min(self.preset);
            // Elapsed never decreases while running, so expiry is sticky.
            self.expired = self.expired || self.elapsed >= self.preset;
        }
        (self.elapsed, self.expired)
    }

    /// Configured duration.
    #[must_use]
    pub fn preset(&self) -> Duration {
        self.preset
    }

    /// Accumulated time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether the timer is accumulating.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the current run has reached its preset.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired
    }
}

/// Read-only view of a timer for logging and HMI collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerStatus {
    /// Timer name.
    pub name: String,
    /// Whether the timer is accumulating.
    pub running: bool,
    /// Accumulated time.
    pub elapsed: Duration,
    /// Configured duration.
    pub preset: Duration,
    /// Whether the current run has expired.
    pub expired: bool,
}

/// All timers owned by one controller.
#[derive(Debug, Clone, Default)]
pub struct TimerService {
    timers: Vec<Timer>,
    names: Vec<String>,
}

impl TimerService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer and return its id. Registering an existing name
    /// returns the existing id and keeps its preset.
    ///
    /// # Panics
    ///
    /// Panics if more than `u16::MAX` timers are registered.
    pub fn add(&mut self, name: impl Into<String>, preset: Duration) -> TimerId {
        let name = name.into();
        if let Some(id) = self.id(&name) {
            return id;
        }
        let id = TimerId(u16::try_from(self.timers.len()).expect("timer count exceeds u16"));
        self.timers.push(Timer::new(preset));
        self.names.push(name);
        id
    }

    /// Look up a timer id by name.
    #[must_use]
    pub fn id(&self, name: &str) -> Option<TimerId> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| u16::try_from(i).ok())
            .map(TimerId)
    }

    /// Access a timer.
    #[must_use]
    pub fn get(&self, id: TimerId) -> Option<&Timer> {
        self.timers.get(id.index())
    }

    /// Name of a timer.
    #[must_use]
    pub fn name(&self, id: TimerId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    /// Start a timer with the given duration (no-op while already running).
    pub fn start(&mut self, id: TimerId, duration: Duration) {
        if let Some(timer) = self.timers.get_mut(id.index()) {
            timer.start_with(duration);
        }
    }

    /// Stop a timer, discarding elapsed time.
    pub fn stop(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.get_mut(id.index()) {
            timer.stop();
        }
    }

    /// Advance a single timer by one cycle.
    ///
    /// Returns `None` for an unknown id.
    pub fn tick(&mut self, id: TimerId, cycle: Duration) -> Option<(Duration, bool)> {
        self.timers.get_mut(id.index()).map(|t| t.tick(cycle))
    }

    /// Advance every running timer by one cycle.
    pub fn advance(&mut self, cycle: Duration) {
        for timer in self.timers.iter_mut().filter(|t| t.is_running()) {
            timer.tick(cycle);
        }
    }

    /// Stop every timer. Returns how many were running.
    pub fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for timer in &mut self.timers {
            if timer.is_running() {
                stopped += 1;
            }
            timer.stop();
        }
        if stopped > 0 {
            trace!(stopped, "Timers stopped");
        }
        stopped
    }

    /// Stop every timer and restore the registered presets.
    ///
    /// `start` with a different duration replaces a timer's preset; this
    /// undoes that, which is what a controller reset needs.
    pub fn reset_all(&mut self, presets: impl IntoIterator<Item = Duration>) {
        self.stop_all();
        for (timer, preset) in self.timers.iter_mut().zip(presets) {
            *timer = Timer::new(preset);
        }
    }

    /// Whether the named timer has expired (`false` for unknown names).
    #[must_use]
    pub fn is_expired(&self, name: &str) -> bool {
        self.id(name)
            .and_then(|id| self.get(id))
            .is_some_and(Timer::is_expired)
    }

    /// Number of running timers.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.timers.iter().filter(|t| t.is_running()).count()
    }

    /// Number of registered timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether no timer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Iterate over `(name, timer)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Timer)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.timers.iter())
    }

    /// Snapshot every timer.
    #[must_use]
    pub fn statuses(&self) -> Vec<TimerStatus> {
        self.iter()
            .map(|(name, t)| TimerStatus {
                name: name.to_string(),
                running: t.is_running(),
                elapsed: t.elapsed(),
                preset: t.preset(),
                expired: t.is_expired(),
            })
            .collect()
    }
}
