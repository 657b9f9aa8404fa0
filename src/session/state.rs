//! Session states and the button transition table.

use crate::link::ButtonKind;
use serde::{Deserialize, Serialize};

/// Top-level controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Idle,
    Calibrating,
    SessionActive,
    Stopping,
}

/// What a button press asks the machine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// IDLE -> CALIBRATING
    BeginCalibration,
    /// CALIBRATING -> IDLE
    AbortCalibration,
    /// SESSION_ACTIVE -> STOPPING -> IDLE
    Stop,
    /// No state change
    Ignore,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::Calibrating => "CALIBRATING",
            SessionState::SessionActive => "SESSION_ACTIVE",
            SessionState::Stopping => "STOPPING",
        }
    }

    /// Transition for a button pressed in this state.
    ///
    /// START only acts in IDLE. STOP acts everywhere except IDLE, and a
    /// repeated STOP while stopping is the same stop.
    pub fn on_button(self, button: ButtonKind) -> Transition {
        match (self, button) {
            (SessionState::Idle, ButtonKind::Start) => Transition::BeginCalibration,
            (SessionState::Calibrating, ButtonKind::Stop) => Transition::AbortCalibration,
            (SessionState::SessionActive, ButtonKind::Stop)
            | (SessionState::Stopping, ButtonKind::Stop) => Transition::Stop,
            (SessionState::Idle, ButtonKind::Stop)
            | (SessionState::Calibrating, ButtonKind::Start)
            | (SessionState::SessionActive, ButtonKind::Start)
            | (SessionState::Stopping, ButtonKind::Start) => Transition::Ignore,
        }
    }

    /// Whether a session is in progress.
    pub fn is_busy(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transition_table() {
        use ButtonKind::{Start, Stop};
        use SessionState::*;

        let table = [
            (Idle, Start, Transition::BeginCalibration),
            (Idle, Stop, Transition::Ignore),
            (Calibrating, Start, Transition::Ignore),
            (Calibrating, Stop, Transition::AbortCalibration),
            (SessionActive, Start, Transition::Ignore),
            (SessionActive, Stop, Transition::Stop),
            (Stopping, Start, Transition::Ignore),
            (Stopping, Stop, Transition::Stop),
        ];

        for (state, button, expected) in table {
            assert_eq!(state.on_button(button), expected, "{state} + {button:?}");
        }
    }

    #[test]
    fn test_start_only_acts_when_idle() {
        for state in [
            SessionState::Calibrating,
            SessionState::SessionActive,
            SessionState::Stopping,
        ] {
            assert!(state.is_busy());
            assert_eq!(state.on_button(ButtonKind::Start), Transition::Ignore);
        }
        assert!(!SessionState::Idle.is_busy());
    }
}
