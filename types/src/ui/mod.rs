//! UI state types for the prompt surface.
//!
//! Pure data types with no IO, no async, no ratatui dependency.
//! Used by both the engine (state ownership) and tui (rendering/input).

mod history;
mod input;

pub use history::{HistoryNav, NavOutcome};
pub use input::{ComposerMode, ComposerState, DraftInput, EditMut, EditRef, QueueEdit};

/// Display toggles read from `[app]` config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiOptions {
    pub ascii_only: bool,
    pub high_contrast: bool,
}
