//! Line grammar spoken by the sensor front-end.
//!
//! Every line is `KEY:VALUE[,KEY:VALUE...]`. Parsing never fails: a line that
//! does not match a known shape becomes [`DeviceMessage::Unknown`] and the
//! caller drops it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Physical button on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ButtonKind {
    Start,
    Stop,
}

/// A button edge reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonEvent {
    pub kind: ButtonKind,
    /// Host-side receive time
    pub timestamp: DateTime<Utc>,
}

impl ButtonEvent {
    pub fn new(kind: ButtonKind, timestamp: DateTime<Utc>) -> Self {
        Self { kind, timestamp }
    }
}

/// Device-side state announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Idle,
    Calibrating { remaining_ms: Option<u64> },
    SessionActive,
    /// Legacy `SESSION:STARTED` line
    SessionStarted,
}

/// Device-side calibration milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationPhase {
    Started,
    Complete,
}

/// Baseline summary computed on the device.
///
/// The conductance value is measured; the heart-rate value is simulated on
/// the device and is kept only for inspection. The host heart-rate baseline
/// always comes from the local sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceBaselineReport {
    pub conductance: f64,
    pub heart_rate_placeholder: f64,
}

/// Instruction for the host display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayCommand {
    CalibrationProgress { seconds: u32 },
    CalibrationInProgress,
    CalibrationComplete,
    Ready,
    SessionActive,
    Text(String),
}

impl DisplayCommand {
    /// Text shown on the host display for this command.
    pub fn render(&self) -> String {
        match self {
            DisplayCommand::CalibrationProgress { seconds } => format!("Calibrating... {seconds}s"),
            DisplayCommand::CalibrationInProgress => "Calibrating...\nPlease relax".to_string(),
            DisplayCommand::CalibrationComplete => "Calibration complete".to_string(),
            DisplayCommand::Ready => "Ready - press START".to_string(),
            DisplayCommand::SessionActive => "Session active".to_string(),
            DisplayCommand::Text(text) => text.clone(),
        }
    }
}

/// One parsed line from the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceMessage {
    Button(ButtonEvent),
    Status(DeviceStatus),
    Calibration(CalibrationPhase),
    Baseline(DeviceBaselineReport),
    Progress { current: u32, total: u32 },
    Conductance(f64),
    Display(DisplayCommand),
    Unknown(String),
}

impl DeviceMessage {
    /// Classify a single line. `received_at` stamps button edges.
    pub fn parse(line: &str, received_at: DateTime<Utc>) -> DeviceMessage {
        let line = clean_line(line);
        let parsed = line.split_once(':').and_then(|(key, value)| match key {
            "BUTTON" => parse_button(value, received_at),
            "STATUS" => parse_status(value).map(DeviceMessage::Status),
            "SESSION" if value == "STARTED" => {
                Some(DeviceMessage::Status(DeviceStatus::SessionStarted))
            }
            "CALIBRATION" => parse_calibration(value),
            "BASELINE" => parse_baseline(value),
            "BASELINE_PROGRESS" => parse_progress(value),
            "GSR_CONDUCTANCE" => parse_float(value).map(DeviceMessage::Conductance),
            "LCD" => Some(DeviceMessage::Display(parse_display(value))),
            _ => None,
        });

        parsed.unwrap_or_else(|| DeviceMessage::Unknown(line))
    }

    /// Whether this message was recognized.
    pub fn is_known(&self) -> bool {
        !matches!(self, DeviceMessage::Unknown(_))
    }
}

/// Strip NUL bytes, carriage returns and surrounding whitespace.
fn clean_line(line: &str) -> String {
    line.chars()
        .filter(|c| *c != '\0' && *c != '\r' && *c != '\n')
        .collect::<String>()
        .trim()
        .to_string()
}

fn parse_button(value: &str, received_at: DateTime<Utc>) -> Option<DeviceMessage> {
    let kind = match value {
        "START" => ButtonKind::Start,
        "STOP" => ButtonKind::Stop,
        _ => return None,
    };
    Some(DeviceMessage::Button(ButtonEvent::new(kind, received_at)))
}

fn parse_status(value: &str) -> Option<DeviceStatus> {
    let mut fields = value.split(',');
    let status = match fields.next()? {
        "IDLE" => DeviceStatus::Idle,
        "SESSION_ACTIVE" => DeviceStatus::SessionActive,
        "CALIBRATING" => {
            let remaining_ms = match fields.next() {
                Some(field) => {
                    let (key, ms) = field.split_once(':')?;
                    if key != "REMAINING" {
                        return None;
                    }
                    Some(ms.trim().parse().ok()?)
                }
                None => None,
            };
            DeviceStatus::Calibrating { remaining_ms }
        }
        _ => return None,
    };

    if fields.next().is_some() {
        return None;
    }
    Some(status)
}

fn parse_calibration(value: &str) -> Option<DeviceMessage> {
    let phase = match value {
        "STARTED" => CalibrationPhase::Started,
        "COMPLETE" => CalibrationPhase::Complete,
        _ => return None,
    };
    Some(DeviceMessage::Calibration(phase))
}

/// `GSR:<float>,HR:<float>`
fn parse_baseline(value: &str) -> Option<DeviceMessage> {
    let (gsr_field, hr_field) = value.split_once(',')?;
    let conductance = gsr_field.strip_prefix("GSR:").and_then(parse_float)?;
    let heart_rate_placeholder = hr_field.strip_prefix("HR:").and_then(parse_float)?;

    Some(DeviceMessage::Baseline(DeviceBaselineReport {
        conductance,
        heart_rate_placeholder,
    }))
}

/// `<n>/<total>`
fn parse_progress(value: &str) -> Option<DeviceMessage> {
    let (current, total) = value.split_once('/')?;
    Some(DeviceMessage::Progress {
        current: current.trim().parse().ok()?,
        total: total.trim().parse().ok()?,
    })
}

fn parse_display(value: &str) -> DisplayCommand {
    match value {
        "CALIBRATION_IN_PROGRESS" => DisplayCommand::CalibrationInProgress,
        "CALIBRATION_COMPLETE" => DisplayCommand::CalibrationComplete,
        "READY" => DisplayCommand::Ready,
        "SESSION_ACTIVE" => DisplayCommand::SessionActive,
        other => match other
            .strip_prefix("CALIBRATION_PROGRESS:")
            .and_then(|s| s.trim().parse().ok())
        {
            Some(seconds) => DisplayCommand::CalibrationProgress { seconds },
            None => DisplayCommand::Text(other.to_string()),
        },
    }
}

fn parse_float(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Line sent from the host to drive the device indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCommand {
    Calibrating,
    SessionActive,
    Idle,
}

impl DeviceCommand {
    /// Wire form, without the line terminator.
    pub fn as_line(&self) -> &'static str {
        match self {
            DeviceCommand::Calibrating => "HOST:CALIBRATING",
            DeviceCommand::SessionActive => "HOST:SESSION_ACTIVE",
            DeviceCommand::Idle => "HOST:IDLE",
        }
    }
}
