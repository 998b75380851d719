//! Progress indicators for long-running CLI work.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for work with no meaningful progress count, such as a model
/// download or an embedding pass.
///
/// Returns a hidden bar when `enabled` is false so callers need no branches.
pub fn create_spinner(message: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}
