//! The session state machine.
//!
//! [`SessionMachine`] owns every collaborator and runs a session on the
//! calling thread:
//!
//! ```text
//! IDLE --START--> CALIBRATING --done--> SESSION_ACTIVE --STOP--> STOPPING --> IDLE
//!                      |                      ^      |
//!                      +--STOP--> IDLE        +------+ window -> classify -> play
//! ```
//!
//! Every blocking step (calibration, window collection, playback monitoring
//! and re-evaluation) polls the inbox between short sleeps, so a STOP takes
//! effect within one poll interval. Any failure below the machine ends the
//! session and returns to IDLE.

use crate::clock::Clock;
use crate::config::Config;
use crate::core::{
    extract_features, CalibrationBaseline, CalibrationCoordinator, CalibrationOutcome, Classifier,
    DeviceFeed, Interrupted, SensorWindow, StressPrediction, WindowCollector,
};
use crate::link::{ButtonEvent, CommandSink, DeviceBaselineReport, DeviceCommand, DeviceMessage};
use crate::peripherals::{Display, HrSensor, Player};
use crate::session::inbox::{Inbox, LinkFeed};
use crate::session::scheduler::{prediction_message, PlaybackItem, PlaybackScheduler};
use crate::session::state::{SessionState, Transition};
use crate::telemetry::SharedStats;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Sleep between idle checks for a button press.
const IDLE_TICK: Duration = Duration::from_millis(50);

pub const WELCOME_TEXT: &str = "Music Therapy Box\nPress START to begin";
pub const SESSION_STARTED_TEXT: &str = "Therapy session started\nAnalyzing your state...";
pub const REEVALUATING_TEXT: &str = "Re-evaluating your state...";
pub const STOPPED_TEXT: &str = "Session stopped.\nPress START for new session";

/// Everything the machine drives.
pub struct Collaborators {
    pub hr_sensor: Box<dyn HrSensor>,
    pub classifier: Box<dyn Classifier>,
    pub player: Box<dyn Player>,
    pub display: Box<dyn Display>,
    /// Outbound indicator commands to the device
    pub indicators: Box<dyn CommandSink>,
}

/// Why [`SessionMachine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The shutdown flag was cleared
    Shutdown,
    /// The device link closed
    LinkLost,
}

/// Failures that end a session early.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device link lost")]
    LinkLost,
    #[error("shutdown requested")]
    Shutdown,
}

/// Mutable per-session context.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub state: SessionState,
    pub baseline: Option<CalibrationBaseline>,
    pub session_id: Option<Uuid>,
}

/// Drives sessions from button presses.
pub struct SessionMachine {
    context: SessionContext,
    inbox: Inbox,
    devices: Collaborators,
    clock: Arc<dyn Clock>,
    stats: SharedStats,
    running: Arc<AtomicBool>,
    collector: WindowCollector,
    calibration: CalibrationCoordinator,
    scheduler: PlaybackScheduler,
    long_window: Duration,
    short_window: Duration,
    poll_interval: Duration,
}

impl SessionMachine {
    pub fn new(
        config: &Config,
        receiver: Receiver<DeviceMessage>,
        devices: Collaborators,
        clock: Arc<dyn Clock>,
        stats: SharedStats,
    ) -> Self {
        Self {
            context: SessionContext::default(),
            inbox: Inbox::new(receiver),
            devices,
            clock,
            stats,
            running: Arc::new(AtomicBool::new(true)),
            collector: WindowCollector::from_config(config),
            calibration: CalibrationCoordinator::new(&config.calibration, config.poll_interval),
            scheduler: PlaybackScheduler::new(config.reevaluation_lead),
            long_window: config.windows.long,
            short_window: config.windows.short,
            poll_interval: config.poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Share an external shutdown flag. Clearing it ends any session in
    /// progress at its next poll and makes [`run`](Self::run) return.
    pub fn with_shutdown_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Swap in a fresh link after a reconnect. Only valid while IDLE.
    pub fn attach(&mut self, receiver: Receiver<DeviceMessage>, indicators: Box<dyn CommandSink>) {
        self.inbox = Inbox::new(receiver);
        self.devices.indicators = indicators;
    }

    pub fn state(&self) -> SessionState {
        self.context.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Host-computed baseline of the latest session.
    pub fn baseline(&self) -> Option<&CalibrationBaseline> {
        self.context.baseline.as_ref()
    }

    /// Baseline the device reported on its own, if any.
    pub fn device_baseline(&self) -> Option<DeviceBaselineReport> {
        self.inbox.device_baseline()
    }

    /// Item scheduled by the running session, if any.
    pub fn playback(&self) -> Option<&PlaybackItem> {
        self.scheduler.current()
    }

    pub fn reevaluation_pending(&self) -> bool {
        self.scheduler.is_reevaluation_armed()
    }

    pub fn is_link_lost(&self) -> bool {
        self.inbox.is_disconnected()
    }

    /// Wait for button presses until shutdown or link loss.
    pub fn run(&mut self) -> RunExit {
        tracing::info!("Controller ready");
        self.devices.display.show(WELCOME_TEXT);
        self.signal(DeviceCommand::Idle);

        while self.running.load(Ordering::SeqCst) {
            if self.step() {
                continue;
            }
            if self.inbox.is_disconnected() {
                return RunExit::LinkLost;
            }
            self.clock.sleep(IDLE_TICK);
        }

        RunExit::Shutdown
    }

    /// Dispatch pending messages and handle at most one button press.
    ///
    /// A START runs the whole session before returning. Returns whether a
    /// press was handled.
    pub fn step(&mut self) -> bool {
        self.inbox.pump(self.devices.display.as_ref());
        let Some(event) = self.inbox.next_button() else {
            return false;
        };
        self.handle_button(event);
        true
    }

    fn handle_button(&mut self, event: ButtonEvent) {
        match self.context.state.on_button(event.kind) {
            Transition::BeginCalibration => self.run_session(),
            Transition::AbortCalibration | Transition::Stop => self.stop_session(),
            Transition::Ignore => {
                tracing::debug!("{:?} ignored while {}", event.kind, self.context.state);
            }
        }
    }

    fn run_session(&mut self) {
        let session_id = Uuid::new_v4();
        self.context.session_id = Some(session_id);
        self.context.baseline = None;
        self.stats.record_session_started();
        tracing::info!("Session {} starting", session_id);

        self.set_state(SessionState::Calibrating);
        match self.calibrate() {
            CalibrationOutcome::Aborted => {
                self.reset_to_idle();
                return;
            }
            CalibrationOutcome::Completed(baseline) => self.context.baseline = baseline,
        }

        self.set_state(SessionState::SessionActive);
        self.signal(DeviceCommand::SessionActive);
        self.devices.display.show(SESSION_STARTED_TEXT);

        match self.session_loop() {
            Ok(()) => tracing::info!("Session {} stopping", session_id),
            Err(e) => tracing::error!("Session {} ended: {}", session_id, e),
        }

        self.stop_session();
    }

    fn calibrate(&mut self) -> CalibrationOutcome {
        let mut feed = LinkFeed::new(
            &mut self.inbox,
            self.devices.display.as_ref(),
            self.context.state,
            &self.running,
        );
        self.calibration.run(
            self.clock.as_ref(),
            self.devices.hr_sensor.as_mut(),
            &mut feed,
            self.devices.display.as_ref(),
            self.devices.indicators.as_mut(),
        )
    }

    /// Window, classify, play and monitor until interrupted.
    fn session_loop(&mut self) -> Result<(), SessionError> {
        loop {
            let window = match self.collect(self.long_window) {
                Ok(window) => window,
                Err(Interrupted) => return self.interruption(),
            };

            let prediction = self.classify(&window);
            self.devices.display.show(&prediction_message(&prediction));

            if let Err(e) = self.scheduler.start(
                prediction,
                self.devices.player.as_mut(),
                self.clock.as_ref(),
            ) {
                tracing::warn!("No playback this cycle: {}", e);
                continue;
            }

            if let Err(Interrupted) = self.monitor_playback() {
                return self.interruption();
            }
            tracing::debug!("Item finished, starting next cycle");
        }
    }

    /// Map an interruption to its cause.
    fn interruption(&self) -> Result<(), SessionError> {
        if self.inbox.is_disconnected() {
            Err(SessionError::LinkLost)
        } else if !self.running.load(Ordering::SeqCst) {
            Err(SessionError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn poll_stop(&mut self) -> bool {
        LinkFeed::new(
            &mut self.inbox,
            self.devices.display.as_ref(),
            self.context.state,
            &self.running,
        )
        .poll_stop()
    }

    fn collect(&mut self, duration: Duration) -> Result<SensorWindow, Interrupted> {
        let mut feed = LinkFeed::new(
            &mut self.inbox,
            self.devices.display.as_ref(),
            self.context.state,
            &self.running,
        );
        let result = self.collector.collect(
            duration,
            self.clock.as_ref(),
            self.devices.hr_sensor.as_mut(),
            &mut feed,
        );

        match &result {
            Ok(_) => self.stats.record_window_collected(),
            Err(_) => self.stats.record_window_interrupted(),
        }
        result
    }

    fn classify(&mut self, window: &SensorWindow) -> StressPrediction {
        let features = extract_features(window, self.context.baseline.as_ref());
        let (prediction, fallback) = match self.devices.classifier.predict(&features) {
            Ok(prediction) => (prediction, false),
            Err(e) => {
                tracing::warn!("Classifier failed, defaulting to NO_STRESS: {}", e);
                (StressPrediction::fallback(), true)
            }
        };

        self.stats.record_prediction(fallback);
        tracing::info!(
            "Prediction: {} (confidence {:.2}) from {} samples",
            prediction.label,
            prediction.confidence,
            window.len()
        );
        prediction
    }

    /// Wait for the current item to finish, re-evaluating once if due.
    fn monitor_playback(&mut self) -> Result<(), Interrupted> {
        loop {
            if self.poll_stop() {
                return Err(Interrupted);
            }
            if !self.devices.player.is_playing() {
                return Ok(());
            }
            if self.scheduler.due_for_reevaluation(self.clock.as_ref()) {
                self.reevaluate()?;
                continue;
            }
            self.clock.sleep(self.poll_interval);
        }
    }

    /// Short-window prediction shown without touching playback.
    fn reevaluate(&mut self) -> Result<(), Interrupted> {
        tracing::info!("Re-evaluating before the current item ends");
        self.stats.record_reevaluation();
        self.devices.display.show(REEVALUATING_TEXT);

        let window = self.collect(self.short_window)?;
        let prediction = self.classify(&window);
        self.devices.display.show(&prediction_message(&prediction));
        Ok(())
    }

    /// STOPPING, then IDLE.
    fn stop_session(&mut self) {
        self.set_state(SessionState::Stopping);
        self.reset_to_idle();
    }

    fn reset_to_idle(&mut self) {
        self.devices.player.stop();
        self.scheduler.cancel();
        self.devices.display.show(STOPPED_TEXT);
        self.signal(DeviceCommand::Idle);
        self.set_state(SessionState::Idle);

        if let Some(session_id) = self.context.session_id.take() {
            self.stats.record_session_stopped();
            tracing::info!("Session {} ended", session_id);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.context.state != state {
            tracing::info!("State: {} -> {}", self.context.state, state);
            self.context.state = state;
        }
    }

    fn signal(&mut self, command: DeviceCommand) {
        if let Err(e) = self.devices.indicators.send(command) {
            tracing::warn!("Failed to send {} to device: {}", command.as_line(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::core::{ClassifierError, FeatureVector, StressLabel};
    use crate::link::{ButtonKind, LinkError};
    use crate::peripherals::{AbsentHrSensor, ContentCategory, ContentHandle, LibraryPlayer};
    use crate::telemetry::create_shared_stats;
    use chrono::Utc;
    use crossbeam_channel::{unbounded, Sender};
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct NullDisplay;

    impl Display for NullDisplay {
        fn show(&self, _text: &str) {}
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn predict(&mut self, _: &FeatureVector) -> Result<StressPrediction, ClassifierError> {
            Err(ClassifierError::Unavailable("no model".into()))
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<DeviceCommand>>>);

    impl CommandSink for SharedSink {
        fn send(&mut self, command: DeviceCommand) -> Result<(), LinkError> {
            self.0.lock().unwrap().push(command);
            Ok(())
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.calibration.duration = Duration::from_secs(1);
        config.windows.long = Duration::from_secs(2);
        config.windows.short = Duration::from_secs(1);
        config
    }

    fn machine(
        clock: Arc<ManualClock>,
        classifier: Box<dyn Classifier>,
        sink: SharedSink,
    ) -> (SessionMachine, Sender<DeviceMessage>) {
        let (tx, rx) = unbounded();
        let player = LibraryPlayer::from_library(
            vec![(
                ContentCategory::Calming,
                vec![ContentHandle {
                    path: PathBuf::new(),
                    title: "calm".into(),
                    category: ContentCategory::Calming,
                    duration: Some(Duration::from_secs(30)),
                }],
            )],
            clock.clone(),
        );
        let devices = Collaborators {
            hr_sensor: Box::new(AbsentHrSensor),
            classifier,
            player: Box::new(player),
            display: Box::new(NullDisplay),
            indicators: Box::new(sink),
        };
        let machine = SessionMachine::new(
            &fast_config(),
            rx,
            devices,
            clock,
            create_shared_stats(),
        );
        (machine, tx)
    }

    fn press(tx: &Sender<DeviceMessage>, kind: ButtonKind) {
        tx.send(DeviceMessage::Button(ButtonEvent::new(kind, Utc::now())))
            .unwrap();
    }

    #[test]
    fn test_stop_when_idle_is_ignored() {
        let clock = Arc::new(ManualClock::default());
        let sink = SharedSink::default();
        let (mut machine, tx) = machine(clock, Box::new(FailingClassifier), sink.clone());

        press(&tx, ButtonKind::Stop);
        assert!(machine.step());
        assert_eq!(machine.state(), SessionState::Idle);
        assert!(sink.0.lock().unwrap().is_empty());
        assert!(!machine.step());
    }

    #[test]
    fn test_link_loss_ends_session_in_idle() {
        let clock = Arc::new(ManualClock::default());
        let sink = SharedSink::default();
        let (mut machine, tx) = machine(clock, Box::new(FailingClassifier), sink.clone());

        press(&tx, ButtonKind::Start);
        for _ in 0..5 {
            tx.send(DeviceMessage::Conductance(8.0)).unwrap();
        }
        drop(tx);

        assert!(machine.step());
        assert_eq!(machine.state(), SessionState::Idle);
        assert!(machine.is_link_lost());
        assert_eq!(machine.run(), RunExit::LinkLost);
        assert_eq!(
            sink.0.lock().unwrap().last().copied(),
            Some(DeviceCommand::Idle)
        );
    }

    #[test]
    fn test_shutdown_flag_ends_session() {
        let clock = Arc::new(ManualClock::default());
        let running = Arc::new(AtomicBool::new(true));
        let (machine, tx) = machine(clock, Box::new(FailingClassifier), SharedSink::default());
        let mut machine = machine.with_shutdown_flag(running.clone());

        press(&tx, ButtonKind::Start);
        running.store(false, Ordering::SeqCst);

        assert!(machine.step());
        assert_eq!(machine.state(), SessionState::Idle);
        assert_eq!(machine.run(), RunExit::Shutdown);
    }

    #[test]
    fn test_classifier_failure_defaults_to_calming() {
        let clock = Arc::new(ManualClock::default());
        let (mut machine, _tx) =
            machine(clock.clone(), Box::new(FailingClassifier), SharedSink::default());

        let window = SensorWindow::new(clock.now(), Duration::from_secs(1));
        let prediction = machine.classify(&window);

        assert_eq!(prediction.label, StressLabel::NoStress);
        assert_eq!(prediction.confidence, 0.0);
        assert_eq!(machine.stats.snapshot().classifier_fallbacks, 1);
    }
}
