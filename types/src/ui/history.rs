//! Up/Down recall over previously sent prompts.

use std::mem::take;

use crate::QueueEntry;

/// Navigation state over the sent history.
///
/// `Idle` means the user is editing a fresh draft.
/// `Active` means the user is browsing history entries.
#[derive(Debug, Default, Clone)]
enum NavState {
    #[default]
    Idle,
    Active {
        index: usize,
        stash: String,
    },
}

/// Result of a navigation attempt: either we moved to an entry, or we're
/// already at the boundary (top of history, or not navigating).
#[derive(Debug, PartialEq, Eq)]
pub enum NavOutcome {
    Moved(String),
    AtBoundary,
}

/// Cursor over the sent history for prompt recall.
///
/// The history itself is owned by the draft store; the cursor only remembers
/// where the user is and what they were typing before they started browsing.
/// Browsing never mutates the history.
///
/// # Navigation Behavior
///
/// When the user presses Up:
/// 1. If not navigating, stash the current draft and show the most recent entry
/// 2. If already navigating, show the next older entry
///
/// When the user presses Down:
/// 1. If at the newest entry, restore the stashed draft
/// 2. Otherwise, show the next newer entry
///
/// Navigation is reset after submitting a prompt.
#[derive(Debug, Default, Clone)]
pub struct HistoryNav {
    state: NavState,
}

impl HistoryNav {
    /// Navigate to the previous (older) entry.
    pub fn up(&mut self, history: &[QueueEntry], current: &str) -> NavOutcome {
        let cur_idx = match &self.state {
            NavState::Idle => None,
            NavState::Active { index, .. } => Some((*index).min(history.len())),
        };

        match cur_idx {
            None => match history.len().checked_sub(1) {
                None => NavOutcome::AtBoundary,
                Some(last_idx) => {
                    self.state = NavState::Active {
                        index: last_idx,
                        stash: current.to_owned(),
                    };
                    NavOutcome::Moved(history[last_idx].content.clone())
                }
            },
            Some(0) => NavOutcome::AtBoundary,
            Some(idx) => {
                let new_idx = idx - 1;
                if let NavState::Active { index, .. } = &mut self.state {
                    *index = new_idx;
                }
                NavOutcome::Moved(history[new_idx].content.clone())
            }
        }
    }

    /// Navigate to the next (newer) entry.
    ///
    /// Returns `AtBoundary` if not currently navigating.
    pub fn down(&mut self, history: &[QueueEntry]) -> NavOutcome {
        let cur_idx = match &self.state {
            NavState::Idle => return NavOutcome::AtBoundary,
            NavState::Active { index, .. } => *index,
        };

        if cur_idx + 1 >= history.len() {
            let NavState::Active { stash, .. } = take(&mut self.state) else {
                return NavOutcome::AtBoundary;
            };
            NavOutcome::Moved(stash)
        } else {
            let new_idx = cur_idx + 1;
            if let NavState::Active { index, .. } = &mut self.state {
                *index = new_idx;
            }
            NavOutcome::Moved(history[new_idx].content.clone())
        }
    }

    #[must_use]
    pub fn is_browsing(&self) -> bool {
        matches!(self.state, NavState::Active { .. })
    }

    /// Index of the entry currently shown, if browsing.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        match self.state {
            NavState::Idle => None,
            NavState::Active { index, .. } => Some(index),
        }
    }

    pub fn reset(&mut self) {
        self.state = NavState::Idle;
    }
}
