//! Session control: button handling, calibration, prediction cycles and
//! playback.

pub mod inbox;
pub mod machine;
pub mod scheduler;
pub mod state;

pub use inbox::{Inbox, LinkFeed};
pub use machine::{Collaborators, RunExit, SessionContext, SessionError, SessionMachine};
pub use scheduler::{
    category_for, prediction_message, PlaybackItem, PlaybackScheduler, ReEvaluationTimer,
};
pub use state::{SessionState, Transition};
