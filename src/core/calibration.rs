//! Resting baseline capture.
//!
//! Calibration pairs every conductance reading that arrives while it runs
//! with a heart-rate read and averages both channels. It ends on whichever
//! comes first: the sample quota or the configured duration. A STOP request
//! aborts it. Calibration never fails a session: without samples the
//! baseline stays unset and features are reported unnormalized.

use crate::clock::Clock;
use crate::config::CalibrationConfig;
use crate::core::windowing::DeviceFeed;
use crate::link::{CommandSink, DeviceCommand};
use crate::peripherals::{Display, HrSensor};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::time::Duration;

/// Display text while calibrating.
pub const CALIBRATING_TEXT: &str = "Calibrating...\nPlease relax";

/// Resting reference values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBaseline {
    /// Mean conductance in microsiemens
    pub conductance: f64,
    /// Mean heart rate over samples that carried one
    pub heart_rate: Option<f64>,
    /// Samples averaged
    pub samples: usize,
}

/// Running collection of calibration samples.
#[derive(Debug, Default)]
pub struct CalibrationAccumulator {
    conductance: Vec<f64>,
    heart_rate: Vec<f64>,
}

impl CalibrationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything collected so far.
    pub fn reset(&mut self) {
        self.conductance.clear();
        self.heart_rate.clear();
    }

    /// Add one paired reading.
    pub fn push(&mut self, conductance: f64, heart_rate: Option<f64>) {
        self.conductance.push(conductance);
        if let Some(bpm) = heart_rate {
            self.heart_rate.push(bpm);
        }
    }

    /// Number of conductance samples collected.
    pub fn len(&self) -> usize {
        self.conductance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conductance.is_empty()
    }

    /// Baseline over the collected samples, `None` when there are none.
    pub fn finish(&self) -> Option<CalibrationBaseline> {
        if self.conductance.is_empty() {
            return None;
        }

        let heart_rate =
            (!self.heart_rate.is_empty()).then(|| Statistics::mean(&self.heart_rate));

        Some(CalibrationBaseline {
            conductance: Statistics::mean(&self.conductance),
            heart_rate,
            samples: self.conductance.len(),
        })
    }
}

/// How a calibration run ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationOutcome {
    /// Finished by quota or timeout; `None` when no samples arrived
    Completed(Option<CalibrationBaseline>),
    /// A STOP arrived first
    Aborted,
}

/// Runs the calibration phase of a session.
#[derive(Debug)]
pub struct CalibrationCoordinator {
    duration: Duration,
    sample_quota: usize,
    poll_interval: Duration,
    accumulator: CalibrationAccumulator,
}

impl CalibrationCoordinator {
    pub fn new(config: &CalibrationConfig, poll_interval: Duration) -> Self {
        Self {
            duration: config.duration,
            sample_quota: config.sample_quota.max(1),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            accumulator: CalibrationAccumulator::new(),
        }
    }

    /// Capture a baseline.
    ///
    /// Readings that arrived before this call are discarded so the baseline
    /// only reflects the calibration period.
    pub fn run(
        &mut self,
        clock: &dyn Clock,
        hr: &mut dyn HrSensor,
        feed: &mut dyn DeviceFeed,
        display: &dyn Display,
        indicators: &mut dyn CommandSink,
    ) -> CalibrationOutcome {
        self.accumulator.reset();
        let stale = feed.take_fresh_conductance().len();
        if stale > 0 {
            tracing::debug!("Discarded {} readings from before calibration", stale);
        }

        display.show(CALIBRATING_TEXT);
        if let Err(e) = indicators.send(DeviceCommand::Calibrating) {
            tracing::warn!("Failed to signal calibration to device: {e}");
        }
        tracing::info!(
            "Calibration started (quota {}, timeout {:?})",
            self.sample_quota,
            self.duration
        );

        let start = clock.now();
        'collect: loop {
            if feed.poll_stop() {
                tracing::info!(
                    "Calibration aborted after {} samples",
                    self.accumulator.len()
                );
                self.accumulator.reset();
                return CalibrationOutcome::Aborted;
            }

            for conductance in feed.take_fresh_conductance() {
                let heart_rate = hr.read().and_then(|r| r.valid_bpm());
                self.accumulator.push(conductance, heart_rate);
                if self.accumulator.len() >= self.sample_quota {
                    break 'collect;
                }
            }

            let elapsed = clock.elapsed_since(start);
            if elapsed >= self.duration {
                tracing::debug!(
                    "Calibration timed out with {}/{} samples",
                    self.accumulator.len(),
                    self.sample_quota
                );
                break;
            }

            clock.sleep(self.poll_interval.min(self.duration - elapsed));
        }

        let baseline = self.accumulator.finish();
        match &baseline {
            Some(b) => {
                tracing::info!(
                    "Baseline established from {} samples: conductance {:.2} uS, heart rate {}",
                    b.samples,
                    b.conductance,
                    b.heart_rate
                        .map(|bpm| format!("{bpm:.1} BPM"))
                        .unwrap_or_else(|| "unavailable".to_string())
                );
                display.show("Calibration complete!");
            }
            None => {
                tracing::warn!("No calibration samples received; features will not be normalized");
                display.show("Calibration complete\nNo baseline data");
            }
        }

        CalibrationOutcome::Completed(baseline)
    }
}
