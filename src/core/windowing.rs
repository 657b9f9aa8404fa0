//! Fixed-duration sample windows.
//!
//! A [`WindowCollector`] samples the latest conductance reading and the local
//! heart-rate sensor at a fixed rate for a fixed duration, checking for a
//! STOP request between every sleep. The same routine produces both the long
//! window that selects content and the short window used for re-evaluation.

use crate::clock::Clock;
use crate::config::Config;
use crate::peripherals::HrSensor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// One paired reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Skin conductance in microsiemens
    pub conductance: f64,
    /// Heart rate in BPM, absent when the sensor had no valid reading
    pub heart_rate: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A time window of samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorWindow {
    /// Start time of the window
    pub start: DateTime<Utc>,
    /// Planned end time of the window
    pub end: DateTime<Utc>,
    pub samples: Vec<SensorSample>,
    /// Sampling ticks skipped because no conductance had arrived yet
    pub skipped_ticks: u32,
}

impl SensorWindow {
    /// Create a new empty window starting at the given time.
    pub fn new(start: DateTime<Utc>, duration: Duration) -> Self {
        let span = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        Self {
            start,
            end: start + span,
            samples: Vec::new(),
            skipped_ticks: 0,
        }
    }

    /// Build a window from already timestamped samples.
    pub fn from_samples(start: DateTime<Utc>, duration: Duration, samples: Vec<SensorSample>) -> Self {
        let mut window = Self::new(start, duration);
        window.samples = samples;
        window
    }

    pub fn push(&mut self, sample: SensorSample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the duration of this window in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }

    /// Samples that carried a heart rate.
    pub fn heart_rate_count(&self) -> usize {
        self.samples.iter().filter(|s| s.heart_rate.is_some()).count()
    }
}

/// Device-side inputs a collection routine polls between sleeps.
pub trait DeviceFeed {
    /// Drain pending device messages and report whether collection must end.
    fn poll_stop(&mut self) -> bool;

    /// Most recent conductance reading, if any has arrived.
    fn latest_conductance(&self) -> Option<f64>;

    /// Conductance readings that arrived since the previous call.
    fn take_fresh_conductance(&mut self) -> Vec<f64>;
}

/// Collection ended early on request.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("collection interrupted")]
pub struct Interrupted;

/// Samples fixed-duration windows.
#[derive(Debug, Clone)]
pub struct WindowCollector {
    sample_interval: Duration,
    poll_interval: Duration,
}

impl WindowCollector {
    pub fn new(sample_interval: Duration, poll_interval: Duration) -> Self {
        let poll_interval = if poll_interval.is_zero() {
            Duration::from_millis(1)
        } else {
            poll_interval
        };
        Self {
            sample_interval: sample_interval.max(Duration::from_millis(1)),
            poll_interval,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sample_interval(), config.poll_interval)
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    /// Collect samples for `duration`.
    ///
    /// Returns [`Interrupted`] as soon as `feed` reports a stop. No sleep is
    /// longer than the poll interval, which bounds the reaction time.
    pub fn collect(
        &self,
        duration: Duration,
        clock: &dyn Clock,
        hr: &mut dyn HrSensor,
        feed: &mut dyn DeviceFeed,
    ) -> Result<SensorWindow, Interrupted> {
        let start = clock.now();
        let mut window = SensorWindow::new(start, duration);
        let mut next_sample = Duration::ZERO;

        loop {
            if feed.poll_stop() {
                tracing::debug!(
                    "Window collection interrupted after {} samples",
                    window.len()
                );
                return Err(Interrupted);
            }

            let elapsed = clock.elapsed_since(start);
            if elapsed >= duration {
                break;
            }

            if elapsed >= next_sample {
                match feed.latest_conductance() {
                    Some(conductance) => window.push(SensorSample {
                        conductance,
                        heart_rate: hr.read().and_then(|r| r.valid_bpm()),
                        timestamp: clock.now(),
                    }),
                    None => window.skipped_ticks += 1,
                }
                next_sample += self.sample_interval;
                if next_sample <= elapsed {
                    next_sample = elapsed + self.sample_interval;
                }
            }

            let until_sample = next_sample.saturating_sub(elapsed);
            let remaining = duration - elapsed;
            clock.sleep(self.poll_interval.min(remaining).min(until_sample));
        }

        if window.skipped_ticks > 0 {
            tracing::warn!(
                "{} sampling ticks skipped waiting for conductance",
                window.skipped_ticks
            );
        }
        tracing::info!(
            "Collected {} samples over {:.1}s ({} with heart rate)",
            window.len(),
            window.duration_secs(),
            window.heart_rate_count()
        );

        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::peripherals::{AbsentHrSensor, HrReading};
    use std::sync::Arc;

    struct FixedHr(f64);

    impl HrSensor for FixedHr {
        fn read(&mut self) -> Option<HrReading> {
            Some(HrReading::new(self.0, true))
        }
    }

    /// Feed with a constant reading that requests a stop at a set time.
    struct TestFeed {
        clock: Arc<ManualClock>,
        conductance: Option<f64>,
        stop_at: Option<DateTime<Utc>>,
        polls: usize,
    }

    impl DeviceFeed for TestFeed {
        fn poll_stop(&mut self) -> bool {
            self.polls += 1;
            self.stop_at.is_some_and(|at| self.clock.now() >= at)
        }

        fn latest_conductance(&self) -> Option<f64> {
            self.conductance
        }

        fn take_fresh_conductance(&mut self) -> Vec<f64> {
            Vec::new()
        }
    }

    fn feed(clock: &Arc<ManualClock>, conductance: Option<f64>) -> TestFeed {
        TestFeed {
            clock: clock.clone(),
            conductance,
            stop_at: None,
            polls: 0,
        }
    }

    fn collector() -> WindowCollector {
        WindowCollector::new(Duration::from_millis(100), Duration::from_millis(100))
    }

    #[test]
    fn test_collects_full_window() {
        let clock = Arc::new(ManualClock::default());
        let mut feed = feed(&clock, Some(12.5));
        let window = collector()
            .collect(
                Duration::from_secs(10),
                clock.as_ref(),
                &mut FixedHr(70.0),
                &mut feed,
            )
            .unwrap();

        assert_eq!(window.len(), 100);
        assert_eq!(window.heart_rate_count(), 100);
        assert!(window.samples.iter().all(|s| s.conductance == 12.5));
        assert_eq!(clock.elapsed_since(window.start), Duration::from_secs(10));
    }

    #[test]
    fn test_skips_ticks_without_conductance() {
        let clock = Arc::new(ManualClock::default());
        let mut feed = feed(&clock, None);
        let window = collector()
            .collect(
                Duration::from_secs(1),
                clock.as_ref(),
                &mut AbsentHrSensor,
                &mut feed,
            )
            .unwrap();

        assert!(window.is_empty());
        assert_eq!(window.skipped_ticks, 10);
    }

    #[test]
    fn test_stop_interrupts_within_poll_interval() {
        let clock = Arc::new(ManualClock::default());
        let start = clock.now();
        let stop_at = start + chrono::Duration::milliseconds(5_030);
        let mut feed = feed(&clock, Some(3.0));
        feed.stop_at = Some(stop_at);

        let result = collector().collect(
            Duration::from_secs(60),
            clock.as_ref(),
            &mut AbsentHrSensor,
            &mut feed,
        );

        assert_eq!(result.unwrap_err(), Interrupted);
        let reaction = clock.now() - stop_at;
        assert!(reaction <= chrono::Duration::milliseconds(100));
    }

    #[test]
    fn test_sleeps_never_exceed_poll_interval() {
        let clock = Arc::new(ManualClock::default());
        let mut feed = feed(&clock, Some(3.0));
        let collector = WindowCollector::new(Duration::from_secs(1), Duration::from_millis(100));
        let window = collector
            .collect(
                Duration::from_secs(5),
                clock.as_ref(),
                &mut AbsentHrSensor,
                &mut feed,
            )
            .unwrap();

        assert_eq!(window.len(), 5);
        assert!(feed.polls >= 50);
    }
}
