//! Signal processing for the therapy box.
//!
//! This module contains:
//! - Sample windows and the collector that fills them
//! - Baseline calibration
//! - Feature extraction from windows
//! - Stress classification

pub mod calibration;
pub mod classifier;
pub mod features;
pub mod windowing;

// Re-export commonly used types
pub use calibration::{
    CalibrationAccumulator, CalibrationBaseline, CalibrationCoordinator, CalibrationOutcome,
};
pub use classifier::{
    Classifier, ClassifierError, RuleBasedClassifier, RuleThresholds, StressLabel,
    StressPrediction,
};
pub use features::{extract_features, FeatureVector, FEATURE_COUNT, FEATURE_NAMES, FEATURE_VERSION};
pub use windowing::{DeviceFeed, Interrupted, SensorSample, SensorWindow, WindowCollector};
