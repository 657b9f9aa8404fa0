//! Time source shared by every duration-bounded routine.
//!
//! Calibration, window collection and playback monitoring all sleep in short
//! ticks and compare timestamps against a start time. Routing those calls
//! through [`Clock`] lets the same code run against wall-clock time on the
//! device host and against a manually advanced clock in tests.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// Source of timestamps and cooperative sleeps.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Time elapsed since `start`, saturating at zero.
    fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        (self.now() - start).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Wall-clock time with real thread sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when slept on or advanced explicitly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward without sleeping.
    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += step;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
