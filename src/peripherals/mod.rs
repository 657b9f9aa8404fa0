//! Host-side peripherals the session drives.
//!
//! Each peripheral sits behind a trait so the session machine can run against
//! real hardware, the bundled stand-ins, or test doubles.

pub mod display;
pub mod hr;
pub mod player;

pub use display::{ConsoleDisplay, Display};
pub use hr::{AbsentHrSensor, HrReading, HrSensor};
pub use player::{ContentCategory, ContentHandle, LibraryPlayer, Player, PlayerError};
