//! Point-to-point serial link with the sensor front-end.
//!
//! This module turns the device's byte stream into typed [`DeviceMessage`]s
//! and writes host commands back. It never retries: a dropped stream ends the
//! reader thread and the owner decides whether to reconnect.

pub mod protocol;
pub mod reader;

// Re-export commonly used types
pub use protocol::{
    ButtonEvent, ButtonKind, CalibrationPhase, DeviceBaselineReport, DeviceCommand,
    DeviceMessage, DeviceStatus, DisplayCommand,
};
pub use reader::{CommandSink, DeviceLink, LineBuffer, LineWriter, LinkError, NoopSink};
