//! Stress classification.
//!
//! The session only depends on the [`Classifier`] trait. A trained model can
//! be plugged in behind it; [`RuleBasedClassifier`] is the built-in
//! threshold model used when no model is configured.

use crate::core::features::FeatureVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Binary stress label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StressLabel {
    Stress,
    NoStress,
}

impl StressLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StressLabel::Stress => "STRESS",
            StressLabel::NoStress => "NO_STRESS",
        }
    }
}

impl std::fmt::Display for StressLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label with its confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressPrediction {
    pub label: StressLabel,
    pub confidence: f64,
}

impl StressPrediction {
    pub fn new(label: StressLabel, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { label, confidence }
    }

    /// Default used when the classifier cannot produce a prediction.
    pub fn fallback() -> Self {
        Self::new(StressLabel::NoStress, 0.0)
    }
}

/// Classifier errors.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Model unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid features: {0}")]
    InvalidInput(String),
}

/// Maps a feature vector to a prediction.
pub trait Classifier: Send {
    fn predict(&mut self, features: &FeatureVector) -> Result<StressPrediction, ClassifierError>;
}

/// Thresholds for [`RuleBasedClassifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleThresholds {
    /// Conductance (uS) at or below which the conductance score is 0
    pub conductance_low: f64,
    /// Conductance (uS) at or above which the conductance score is 1
    pub conductance_high: f64,
    pub heart_rate_low: f64,
    pub heart_rate_high: f64,
    pub conductance_weight: f64,
    pub heart_rate_weight: f64,
    /// Combined score above which the label is STRESS
    pub stress_cutoff: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            conductance_low: 5.0,
            conductance_high: 25.0,
            heart_rate_low: 60.0,
            heart_rate_high: 100.0,
            conductance_weight: 0.6,
            heart_rate_weight: 0.4,
            stress_cutoff: 0.6,
        }
    }
}

/// Weighted threshold model over absolute conductance and heart rate.
///
/// Baseline offsets carried by the feature vector are added back so the
/// thresholds always apply to absolute values. A window without heart-rate
/// samples scores 0 on that channel.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedClassifier {
    thresholds: RuleThresholds,
}

impl RuleBasedClassifier {
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self { thresholds }
    }

    /// Combined stress score in `[0, 1]`.
    pub fn score(&self, features: &FeatureVector) -> f64 {
        let t = &self.thresholds;

        let conductance = features.eda_mean() + features.conductance_offset;
        let conductance_score = ramp(conductance, t.conductance_low, t.conductance_high);

        let heart_rate_score = if features.heart_rate_samples > 0 {
            let heart_rate = features.hr_mean() + features.heart_rate_offset;
            ramp(heart_rate, t.heart_rate_low, t.heart_rate_high)
        } else {
            0.0
        };

        t.conductance_weight * conductance_score + t.heart_rate_weight * heart_rate_score
    }
}

impl Classifier for RuleBasedClassifier {
    fn predict(&mut self, features: &FeatureVector) -> Result<StressPrediction, ClassifierError> {
        if features.conductance_samples == 0 {
            return Err(ClassifierError::InvalidInput(
                "window has no conductance samples".to_string(),
            ));
        }

        let score = self.score(features);
        if !score.is_finite() {
            return Err(ClassifierError::InvalidInput(format!(
                "non-finite score {score}"
            )));
        }

        let prediction = if score > self.thresholds.stress_cutoff {
            let confidence = if score > 0.8 { 0.8 } else { 0.7 };
            StressPrediction::new(StressLabel::Stress, confidence)
        } else {
            let confidence = if score <= 0.2 {
                0.8
            } else if score <= 0.4 {
                0.7
            } else {
                0.6
            };
            StressPrediction::new(StressLabel::NoStress, confidence)
        };

        tracing::debug!("Rule-based score {:.3} -> {}", score, prediction.label);
        Ok(prediction)
    }
}

/// Linear 0..1 ramp between `low` and `high`.
fn ramp(value: f64, low: f64, high: f64) -> f64 {
    if value <= low {
        0.0
    } else if value >= high {
        1.0
    } else {
        (value - low) / (high - low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::FEATURE_COUNT;

    fn features(eda_mean: f64, hr_mean: Option<f64>) -> FeatureVector {
        let mut values = [0.0; FEATURE_COUNT];
        values[7] = eda_mean;
        values[0] = hr_mean.unwrap_or(0.0);
        FeatureVector {
            values,
            heart_rate_samples: if hr_mean.is_some() { 10 } else { 0 },
            conductance_samples: 10,
            heart_rate_offset: 0.0,
            conductance_offset: 0.0,
        }
    }

    #[test]
    fn test_high_arousal_is_stress() {
        let mut classifier = RuleBasedClassifier::default();
        let prediction = classifier.predict(&features(30.0, Some(110.0))).unwrap();
        assert_eq!(prediction.label, StressLabel::Stress);
        assert_eq!(prediction.confidence, 0.8);
    }

    #[test]
    fn test_resting_is_no_stress() {
        let mut classifier = RuleBasedClassifier::default();
        let prediction = classifier.predict(&features(3.0, Some(58.0))).unwrap();
        assert_eq!(prediction.label, StressLabel::NoStress);
        assert_eq!(prediction.confidence, 0.8);
    }

    #[test]
    fn test_missing_heart_rate_scores_conductance_only() {
        let classifier = RuleBasedClassifier::default();
        // Conductance at the high threshold alone reaches 0.6, not above it
        let score = classifier.score(&features(25.0, None));
        assert!((score - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_offsets_restore_absolute_values() {
        let classifier = RuleBasedClassifier::default();
        let mut relative = features(2.0, Some(10.0));
        relative.conductance_offset = 13.0;
        relative.heart_rate_offset = 70.0;
        assert_eq!(
            classifier.score(&relative),
            classifier.score(&features(15.0, Some(80.0)))
        );
    }

    #[test]
    fn test_empty_window_is_rejected() {
        let mut classifier = RuleBasedClassifier::default();
        let mut empty = features(0.0, None);
        empty.conductance_samples = 0;
        assert!(classifier.predict(&empty).is_err());
    }

    #[test]
    fn test_prediction_confidence_clamped() {
        assert_eq!(StressPrediction::new(StressLabel::Stress, 1.7).confidence, 1.0);
        assert_eq!(StressPrediction::new(StressLabel::Stress, f64::NAN).confidence, 0.0);
        let fallback = StressPrediction::fallback();
        assert_eq!(fallback.label, StressLabel::NoStress);
        assert_eq!(fallback.confidence, 0.0);
    }
}
