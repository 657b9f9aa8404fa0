//! Host display.

/// Text display facing the user.
///
/// `show` takes `&self` so the display can be shared with the message
/// dispatcher while a collection routine also writes to it.
pub trait Display: Send {
    fn show(&self, text: &str);
}

/// Writes display text to stdout and the log.
#[derive(Debug, Default)]
pub struct ConsoleDisplay;

impl Display for ConsoleDisplay {
    fn show(&self, text: &str) {
        tracing::debug!(target: "display", "{}", text.replace('\n', " | "));
        println!("[display] {}", text.replace('\n', " / "));
    }
}
