//! Terminal styling and progress helpers for the `docsift` binary.

pub mod progress;
pub mod theme;

pub use progress::create_spinner;
pub use theme::{THEME, Theme};
