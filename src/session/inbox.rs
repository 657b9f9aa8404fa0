//! Single dispatch point for device messages.
//!
//! Every message the link reader queues is consumed here, in arrival order,
//! by one `match`. Buttons wait in a FIFO until the session machine takes
//! them; conductance updates the latest value; display and progress lines go
//! straight to the display; status lines are logged when they change.

use crate::core::windowing::DeviceFeed;
use crate::link::{
    ButtonEvent, ButtonKind, CalibrationPhase, DeviceBaselineReport, DeviceMessage, DeviceStatus,
};
use crate::peripherals::Display;
use crate::session::state::{SessionState, Transition};
use crossbeam_channel::{Receiver, TryRecvError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Readings kept between two `take_fresh_conductance` calls.
const MAX_FRESH_READINGS: usize = 1_000;

/// Consumer side of the device link.
pub struct Inbox {
    receiver: Receiver<DeviceMessage>,
    buttons: VecDeque<ButtonEvent>,
    latest_conductance: Option<f64>,
    fresh_conductance: VecDeque<f64>,
    device_baseline: Option<DeviceBaselineReport>,
    last_status: Option<DeviceStatus>,
    disconnected: bool,
}

impl Inbox {
    pub fn new(receiver: Receiver<DeviceMessage>) -> Self {
        Self {
            receiver,
            buttons: VecDeque::new(),
            latest_conductance: None,
            fresh_conductance: VecDeque::new(),
            device_baseline: None,
            last_status: None,
            disconnected: false,
        }
    }

    /// Dispatch everything currently queued.
    pub fn pump(&mut self, display: &dyn Display) {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => self.dispatch(message, display),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        tracing::warn!("Device link closed");
                    }
                    self.disconnected = true;
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, message: DeviceMessage, display: &dyn Display) {
        match message {
            DeviceMessage::Button(event) => {
                tracing::debug!("Button {:?}", event.kind);
                self.buttons.push_back(event);
            }
            DeviceMessage::Conductance(value) => {
                self.latest_conductance = Some(value);
                if self.fresh_conductance.len() >= MAX_FRESH_READINGS {
                    self.fresh_conductance.pop_front();
                }
                self.fresh_conductance.push_back(value);
            }
            DeviceMessage::Baseline(report) => {
                tracing::info!(
                    "Device baseline: conductance {:.2} uS (heart rate placeholder {:.1})",
                    report.conductance,
                    report.heart_rate_placeholder
                );
                self.device_baseline = Some(report);
            }
            DeviceMessage::Progress { current, total } => {
                display.show(&format!("Collecting baseline\n{current}/{total}"));
            }
            DeviceMessage::Display(command) => display.show(&command.render()),
            DeviceMessage::Status(status) => {
                if self.last_status != Some(status) {
                    tracing::info!("Device status: {:?}", status);
                    self.last_status = Some(status);
                }
            }
            DeviceMessage::Calibration(phase) => match phase {
                CalibrationPhase::Started => tracing::info!("Device started calibration"),
                CalibrationPhase::Complete => tracing::info!("Device finished calibration"),
            },
            DeviceMessage::Unknown(line) => {
                tracing::debug!("Ignoring device line {line:?}");
            }
        }
    }

    /// Oldest pending button press.
    pub fn next_button(&mut self) -> Option<ButtonEvent> {
        self.buttons.pop_front()
    }

    /// Consume pending buttons in order until one ends the current state.
    ///
    /// Presses that do nothing in `state` are consumed and logged.
    pub fn take_stop(&mut self, state: SessionState) -> bool {
        while let Some(event) = self.buttons.pop_front() {
            match state.on_button(event.kind) {
                Transition::Stop | Transition::AbortCalibration => {
                    tracing::info!("STOP received while {}", state);
                    return true;
                }
                _ => {
                    if event.kind == ButtonKind::Start {
                        tracing::info!("START ignored while {}", state);
                    } else {
                        tracing::debug!("{:?} ignored while {}", event.kind, state);
                    }
                }
            }
        }
        false
    }

    pub fn latest_conductance(&self) -> Option<f64> {
        self.latest_conductance
    }

    pub fn take_fresh_conductance(&mut self) -> Vec<f64> {
        self.fresh_conductance.drain(..).collect()
    }

    /// Baseline reported by the device itself, kept for inspection only.
    pub fn device_baseline(&self) -> Option<DeviceBaselineReport> {
        self.device_baseline
    }

    pub fn last_status(&self) -> Option<DeviceStatus> {
        self.last_status
    }

    /// Whether the reader side has gone away.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn pending_buttons(&self) -> usize {
        self.buttons.len()
    }
}

/// [`DeviceFeed`] over the inbox for one collection routine.
///
/// A stop is reported for a STOP press, a closed link or a shutdown request.
pub struct LinkFeed<'a> {
    inbox: &'a mut Inbox,
    display: &'a dyn Display,
    state: SessionState,
    running: &'a AtomicBool,
}

impl<'a> LinkFeed<'a> {
    pub fn new(
        inbox: &'a mut Inbox,
        display: &'a dyn Display,
        state: SessionState,
        running: &'a AtomicBool,
    ) -> Self {
        Self {
            inbox,
            display,
            state,
            running,
        }
    }
}

impl DeviceFeed for LinkFeed<'_> {
    fn poll_stop(&mut self) -> bool {
        self.inbox.pump(self.display);
        self.inbox.take_stop(self.state)
            || self.inbox.is_disconnected()
            || !self.running.load(Ordering::SeqCst)
    }

    fn latest_conductance(&self) -> Option<f64> {
        self.inbox.latest_conductance()
    }

    fn take_fresh_conductance(&mut self) -> Vec<f64> {
        self.inbox.take_fresh_conductance()
    }
}
