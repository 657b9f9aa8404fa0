//! Host-local heart-rate sensor.

use serde::{Deserialize, Serialize};

/// One reading from the optical heart-rate sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrReading {
    pub bpm: f64,
    pub finger_detected: bool,
}

impl HrReading {
    pub fn new(bpm: f64, finger_detected: bool) -> Self {
        Self {
            bpm,
            finger_detected,
        }
    }

    /// Beats per minute, if the reading is usable.
    pub fn valid_bpm(&self) -> Option<f64> {
        (self.finger_detected && self.bpm.is_finite() && self.bpm > 0.0).then_some(self.bpm)
    }
}

/// Heart-rate source sampled alongside conductance.
pub trait HrSensor: Send {
    /// Latest reading, or `None` when the sensor has nothing to report.
    fn read(&mut self) -> Option<HrReading>;
}

/// Stand-in for hosts without a heart-rate sensor attached.
///
/// Every sample carries no heart rate; the feature extractor handles the gap.
#[derive(Debug, Default)]
pub struct AbsentHrSensor;

impl HrSensor for AbsentHrSensor {
    fn read(&mut self) -> Option<HrReading> {
        None
    }
}
