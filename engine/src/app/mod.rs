//! Prompt surface state.
//!
//! [`App`] owns the composer (draft editor, queue focus, inline edit) and
//! drives the [`QueueManager`]. It does no rendering and no terminal IO: the
//! TUI layer reads state from `App` and forwards key presses to the
//! mode guards in [`modes`].
//!
//! # Modes
//!
//! - **Compose**: typing the draft. Up/Down on the first/last line walk the
//!   sent history.
//! - **Queue**: the queue panel has focus; rows can be edited, removed, or
//!   retried.
//! - **Edit**: inline edit of one queued entry. The entry is held out of
//!   dispatch until the edit commits or is cancelled.
//!
//! The draft is written back to the store on a short debounce, and
//! immediately on submit and quit.

mod modes;

pub use modes::{
    ComposeMode, ComposeModeAccess, EditMode, EditModeAccess, QueueFocus, QueueFocusAccess,
};

use std::time::{Duration, Instant};

use promptq_types::ui::{ComposerMode, ComposerState, DraftInput, EditRef, HistoryNav, UiOptions};
use promptq_types::{EntryId, QueueEntry};
use tracing::debug;

use crate::queue::{QueueManager, QueueSnapshot};

const DRAFT_SAVE_DEBOUNCE: Duration = Duration::from_millis(300);
const STATUS_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone)]
struct StatusLine {
    text: String,
    shown_at: Instant,
}

pub struct App {
    queue: QueueManager,
    composer: ComposerState,
    nav: HistoryNav,
    /// Set when the on-screen draft differs from the stored one.
    draft_dirty_since: Option<Instant>,
    status: Option<StatusLine>,
    /// Shown while no status message is active.
    notice: Option<String>,
    options: UiOptions,
    should_quit: bool,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("mode", &self.composer.mode())
            .field("should_quit", &self.should_quit)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Build the surface over `queue`, restoring the stored draft.
    #[must_use]
    pub fn new(queue: QueueManager, options: UiOptions) -> Self {
        let draft = DraftInput::new(queue.draft());
        Self {
            queue,
            composer: ComposerState::Compose(draft),
            nav: HistoryNav::default(),
            draft_dirty_since: None,
            status: None,
            notice: None,
            options,
            should_quit: false,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    #[must_use]
    pub fn mode(&self) -> ComposerMode {
        self.composer.mode()
    }

    #[must_use]
    pub fn composer(&self) -> &ComposerState {
        &self.composer
    }

    #[must_use]
    pub fn draft(&self) -> &DraftInput {
        self.composer.draft()
    }

    #[must_use]
    pub fn draft_text(&self) -> &str {
        self.composer.draft().text()
    }

    /// Entry being edited inline, with its working buffer.
    #[must_use]
    pub fn active_edit(&self) -> Option<(&EntryId, &DraftInput)> {
        match self.composer.edit_ref() {
            EditRef::Active(edit) => Some((&edit.entry, &edit.buffer)),
            EditRef::Inactive => None,
        }
    }

    #[must_use]
    pub fn selected_row(&self) -> Option<usize> {
        self.composer.selected()
    }

    /// Index into sent history while browsing with Up/Down.
    #[must_use]
    pub fn history_position(&self) -> Option<usize> {
        self.nav.position()
    }

    #[must_use]
    pub fn options(&self) -> UiOptions {
        self.options
    }

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    // ------------------------------------------------------------------
    // Status line
    // ------------------------------------------------------------------

    #[must_use]
    pub fn status_message(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.text.as_str())
            .or(self.notice.as_deref())
    }

    pub fn push_status(&mut self, text: impl Into<String>) {
        self.status = Some(StatusLine {
            text: text.into(),
            shown_at: Instant::now(),
        });
    }

    /// Persistent message shown when nothing transient is on screen.
    pub fn set_notice(&mut self, text: Option<String>) {
        self.notice = text;
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    /// Per-frame upkeep: debounced draft save, status expiry, and keeping
    /// the queue selection valid as entries leave the queue.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    fn tick_at(&mut self, now: Instant) {
        if let Some(since) = self.draft_dirty_since
            && now.duration_since(since) >= DRAFT_SAVE_DEBOUNCE
        {
            self.flush_draft();
        }
        if let Some(status) = &self.status
            && now.duration_since(status.shown_at) >= STATUS_TTL
        {
            self.status = None;
        }
        self.reconcile_selection();
    }

    /// Write the on-screen draft to the store now.
    pub fn flush_draft(&mut self) {
        if self.draft_dirty_since.take().is_some() {
            self.queue.set_draft(self.composer.draft().text());
            debug!("Draft saved");
        }
    }

    pub fn request_quit(&mut self) {
        if let EditModeAccess::InEdit(edit) = self.edit_mode_mut() {
            edit.cancel();
        }
        self.flush_draft();
        self.should_quit = true;
    }

    pub fn toggle_forced_offline(&mut self) {
        let forced = self.queue.network().toggle_forced_offline();
        self.push_status(if forced {
            "Offline mode: prompts will wait"
        } else {
            "Offline mode off"
        });
    }

    // ------------------------------------------------------------------
    // Focus
    // ------------------------------------------------------------------

    /// Move focus to the queue panel. Does nothing when the queue is empty.
    pub fn focus_queue(&mut self) {
        if self.queue.snapshot().queue.is_empty() {
            self.push_status("Queue is empty");
            return;
        }
        self.nav.reset();
        let composer = std::mem::take(&mut self.composer);
        self.composer = composer.into_queue(0);
    }

    pub fn focus_compose(&mut self) {
        if let EditModeAccess::InEdit(edit) = self.edit_mode_mut() {
            edit.commit();
        }
        let composer = std::mem::take(&mut self.composer);
        self.composer = composer.into_compose();
    }

    fn mark_draft_dirty(&mut self) {
        if self.draft_dirty_since.is_none() {
            self.draft_dirty_since = Some(Instant::now());
        }
    }

    fn sent_history(&self) -> Vec<QueueEntry> {
        self.queue.with_store(|store| store.sent().to_vec())
    }

    fn reconcile_selection(&mut self) {
        let snapshot = self.queue.snapshot();

        if let EditRef::Active(edit) = self.composer.edit_ref() {
            let id = edit.entry.clone();
            match snapshot.queue.iter().position(|e| e.id == id) {
                Some(row) => {
                    if let Some(selected) = self.composer.selected_mut() {
                        *selected = row;
                    }
                }
                None => {
                    let composer = std::mem::take(&mut self.composer);
                    let (composer, _) = composer.take_edit();
                    self.composer = composer;
                    self.queue.end_edit();
                    self.push_status("Entry left the queue while editing");
                }
            }
        }

        let len = snapshot.queue.len();
        match self.composer.mode() {
            ComposerMode::Queue if len == 0 => {
                let composer = std::mem::take(&mut self.composer);
                self.composer = composer.into_compose();
            }
            ComposerMode::Queue | ComposerMode::Edit => {
                if let Some(selected) = self.composer.selected_mut()
                    && *selected >= len
                {
                    *selected = len.saturating_sub(1);
                }
            }
            ComposerMode::Compose => {}
        }
    }
}
