//! Feature computation from sample windows.
//!
//! Each window yields a fixed, ordered vector of fifteen statistics: seven
//! per channel for heart rate and conductance, plus the conductance slope.
//! When a calibration baseline is available the location statistics (mean,
//! min, max) are expressed relative to it; spread and shape are unaffected.
//!
//! Extraction is a pure function of the window and baseline.

use crate::core::calibration::CalibrationBaseline;
use crate::core::windowing::SensorWindow;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Layout version of [`FeatureVector`]. Bump when names or order change.
pub const FEATURE_VERSION: u32 = 1;

pub const FEATURE_COUNT: usize = 15;

/// Feature names, in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "hr_mean",
    "hr_std",
    "hr_min",
    "hr_max",
    "hr_range",
    "hr_skew",
    "hr_kurtosis",
    "eda_mean",
    "eda_std",
    "eda_min",
    "eda_max",
    "eda_range",
    "eda_skew",
    "eda_kurtosis",
    "eda_slope",
];

/// Relative spread below which a channel counts as constant.
const FLAT_TOLERANCE: f64 = 1e-12;

/// The ordered feature vector fed to the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: [f64; FEATURE_COUNT],
    /// Samples with a heart rate
    pub heart_rate_samples: usize,
    pub conductance_samples: usize,
    /// Baseline subtracted from the heart-rate location statistics
    pub heart_rate_offset: f64,
    /// Baseline subtracted from the conductance location statistics
    pub conductance_offset: f64,
}

impl FeatureVector {
    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.values[i])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// `(name, value)` pairs in vector order.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES
            .iter()
            .copied()
            .zip(self.values.iter().copied())
            .collect()
    }

    pub fn hr_mean(&self) -> f64 {
        self.values[0]
    }

    pub fn eda_mean(&self) -> f64 {
        self.values[7]
    }

    pub fn eda_slope(&self) -> f64 {
        self.values[14]
    }
}

/// Per-channel statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ChannelStats {
    mean: f64,
    std: f64,
    min: f64,
    max: f64,
    range: f64,
    skew: f64,
    kurtosis: f64,
}

impl ChannelStats {
    fn compute(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mean = Statistics::mean(values);
        let min = Statistics::min(values);
        let max = Statistics::max(values);

        let mut stats = Self {
            mean,
            min,
            max,
            range: max - min,
            ..Self::default()
        };

        if values.len() < 2 {
            return stats;
        }

        let std = Statistics::std_dev(values);
        if !std.is_finite() || std <= FLAT_TOLERANCE * mean.abs().max(1.0) {
            return stats;
        }
        stats.std = std;

        // Biased central moments, excess kurtosis
        let n = values.len() as f64;
        let (m2, m3, m4) = values.iter().fold((0.0, 0.0, 0.0), |(m2, m3, m4), x| {
            let d = x - mean;
            let d2 = d * d;
            (m2 + d2, m3 + d2 * d, m4 + d2 * d2)
        });
        let (m2, m3, m4) = (m2 / n, m3 / n, m4 / n);
        if m2 > 0.0 {
            stats.skew = m3 / m2.powf(1.5);
            stats.kurtosis = m4 / (m2 * m2) - 3.0;
        }

        stats
    }

    fn shift(mut self, offset: f64) -> Self {
        self.mean -= offset;
        self.min -= offset;
        self.max -= offset;
        self
    }
}

/// Least-squares slope of `(x, y)` points, 0.0 when undefined.
fn slope(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (num, den) = points.iter().fold((0.0, 0.0), |(num, den), (x, y)| {
        let dx = x - mean_x;
        (num + dx * (y - mean_y), den + dx * dx)
    });

    if den <= 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Compute the feature vector for a window.
pub fn extract_features(
    window: &SensorWindow,
    baseline: Option<&CalibrationBaseline>,
) -> FeatureVector {
    let heart_rates: Vec<f64> = window.samples.iter().filter_map(|s| s.heart_rate).collect();
    let conductance: Vec<f64> = window.samples.iter().map(|s| s.conductance).collect();

    let mut hr = ChannelStats::compute(&heart_rates);
    let mut eda = ChannelStats::compute(&conductance);

    let mut heart_rate_offset = 0.0;
    let mut conductance_offset = 0.0;
    if let Some(baseline) = baseline {
        if !conductance.is_empty() {
            conductance_offset = baseline.conductance;
            eda = eda.shift(conductance_offset);
        }
        if let (Some(offset), false) = (baseline.heart_rate, heart_rates.is_empty()) {
            heart_rate_offset = offset;
            hr = hr.shift(offset);
        }
    }

    // Slope in conductance units per second from the window start
    let points: Vec<(f64, f64)> = window
        .samples
        .iter()
        .map(|s| {
            let t = (s.timestamp - window.start).num_microseconds().unwrap_or(0) as f64 / 1e6;
            (t, s.conductance)
        })
        .collect();

    FeatureVector {
        values: [
            hr.mean,
            hr.std,
            hr.min,
            hr.max,
            hr.range,
            hr.skew,
            hr.kurtosis,
            eda.mean,
            eda.std,
            eda.min,
            eda.max,
            eda.range,
            eda.skew,
            eda.kurtosis,
            slope(&points),
        ],
        heart_rate_samples: heart_rates.len(),
        conductance_samples: conductance.len(),
        heart_rate_offset,
        conductance_offset,
    }
}
