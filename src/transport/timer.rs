//! Interval timers run by the cooperative scheduler.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{Duration, Instant};

// ============================================================================
// Constants
// ============================================================================

/// Interval used when a timer is registered without one (1,000,000 µs).
pub const DEFAULT_TIMER_INTERVAL: Duration = Duration::from_micros(1_000_000);

// ============================================================================
// Types
// ============================================================================

/// Timer callback.
pub type TimerCallback = Box<dyn FnMut()>;

// ============================================================================
// Timer
// ============================================================================

/// A callback with a minimum interval between invocations.
///
/// Fires at most once per elapsed interval. A timer that never fired is
/// always due.
pub struct Timer {
    callback: TimerCallback,
    interval: Duration,
    last_fired: Option<Instant>,
}

impl Timer {
    /// Creates a timer that has never fired.
    #[must_use]
    pub fn new(callback: TimerCallback, interval: Duration) -> Self {
        Self {
            callback,
            interval,
            last_fired: None,
        }
    }

    /// Returns the minimum interval.
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` if the interval has elapsed at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Fires the callback if due. Returns whether it fired.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        (self.callback)();
        self.last_fired = Some(Instant::now());
        true
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("interval", &self.interval)
            .field("last_fired", &self.last_fired)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
