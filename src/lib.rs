//! Music Therapy Box - host controller for a sensor-driven music therapy box.
//!
//! The host talks to a sensor front-end over a serial line, captures a
//! resting baseline, predicts stress from windows of skin conductance and
//! heart rate, and plays music matching the prediction. Each prediction
//! cycle re-evaluates once before its track ends.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Music Therapy Box                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │ Device Link │──▶│    Inbox    │──▶│   Session   │         │
//! │  │  (reader)   │   │ (dispatch)  │   │   Machine   │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │         ▲                                   │                │
//! │         │ HOST:*                            ▼                │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │ Calibration │──▶│  Windows +  │──▶│  Playback   │         │
//! │  │  (baseline) │   │  Features   │   │  Scheduler  │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use music_therapy_box::{core, link};
//! use chrono::Utc;
//!
//! let message = link::DeviceMessage::parse("GSR_CONDUCTANCE:12.50", Utc::now());
//! assert_eq!(message, link::DeviceMessage::Conductance(12.5));
//!
//! let window = core::SensorWindow::new(Utc::now(), std::time::Duration::from_secs(60));
//! let features = core::extract_features(&window, None);
//! assert_eq!(features.values.len(), core::FEATURE_COUNT);
//! ```

pub mod clock;
pub mod config;
pub mod core;
pub mod link;
pub mod peripherals;
pub mod session;
pub mod telemetry;

// Re-export key types at crate root for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError};
pub use core::{
    extract_features, CalibrationBaseline, Classifier, FeatureVector, RuleBasedClassifier,
    SensorWindow, StressLabel, StressPrediction, WindowCollector,
};
pub use link::{DeviceCommand, DeviceLink, DeviceMessage, LinkError};
pub use session::{Collaborators, RunExit, SessionMachine, SessionState};
pub use telemetry::{create_shared_stats, SessionStats, SharedStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
