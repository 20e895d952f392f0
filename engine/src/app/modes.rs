//! Borrow-scoped mode guards.
//!
//! Each guard holds `&mut App`, so the composer mode cannot change under it.
//! The TUI asks for the guard matching the current mode and forwards keys.

use promptq_types::ui::{ComposerState, DraftInput, EditMut, NavOutcome, QueueEdit};

use super::App;
use crate::queue::{ContentUpdate, Removal};

pub struct ComposeMode<'a> {
    app: &'a mut App,
}

pub struct QueueFocus<'a> {
    app: &'a mut App,
}

pub struct EditMode<'a> {
    app: &'a mut App,
}

pub enum ComposeModeAccess<'a> {
    InCompose(ComposeMode<'a>),
    NotCompose,
}

pub enum QueueFocusAccess<'a> {
    InQueue(QueueFocus<'a>),
    NotQueue,
}

pub enum EditModeAccess<'a> {
    InEdit(EditMode<'a>),
    NotEdit,
}

impl App {
    pub fn compose_mode_mut(&mut self) -> ComposeModeAccess<'_> {
        match &self.composer {
            ComposerState::Compose(_) => ComposeModeAccess::InCompose(ComposeMode { app: self }),
            _ => ComposeModeAccess::NotCompose,
        }
    }

    pub fn queue_focus_mut(&mut self) -> QueueFocusAccess<'_> {
        match &self.composer {
            ComposerState::Queue { .. } => QueueFocusAccess::InQueue(QueueFocus { app: self }),
            _ => QueueFocusAccess::NotQueue,
        }
    }

    pub fn edit_mode_mut(&mut self) -> EditModeAccess<'_> {
        match &self.composer {
            ComposerState::Edit { .. } => EditModeAccess::InEdit(EditMode { app: self }),
            _ => EditModeAccess::NotEdit,
        }
    }
}

// ============================================================================
// Compose
// ============================================================================

impl ComposeMode<'_> {
    /// Apply a text edit. Any edit ends history browsing: the recalled text
    /// becomes an ordinary draft.
    fn edit(&mut self, f: impl FnOnce(&mut DraftInput)) {
        let draft = self.app.composer.draft_mut();
        let before = draft.text().to_owned();
        f(draft);
        if draft.text() != before {
            self.app.nav.reset();
            self.app.mark_draft_dirty();
        }
    }

    pub fn move_cursor_left(&mut self) {
        self.app.composer.draft_mut().move_cursor_left();
    }

    pub fn move_cursor_right(&mut self) {
        self.app.composer.draft_mut().move_cursor_right();
    }

    pub fn reset_cursor(&mut self) {
        self.app.composer.draft_mut().reset_cursor();
    }

    pub fn move_cursor_end(&mut self) {
        self.app.composer.draft_mut().move_cursor_end();
    }

    pub fn enter_char(&mut self, c: char) {
        self.edit(|d| d.enter_char(c));
    }

    pub fn enter_newline(&mut self) {
        self.edit(DraftInput::enter_newline);
    }

    pub fn enter_text(&mut self, text: &str) {
        self.edit(|d| d.enter_text(text));
    }

    pub fn delete_char(&mut self) {
        self.edit(DraftInput::delete_char);
    }

    pub fn delete_char_forward(&mut self) {
        self.edit(DraftInput::delete_char_forward);
    }

    pub fn delete_word_backwards(&mut self) {
        self.edit(DraftInput::delete_word_backwards);
    }

    pub fn clear_line(&mut self) {
        self.edit(DraftInput::clear);
    }

    /// Up arrow: older history from the first line, otherwise move the caret.
    pub fn up(&mut self) {
        if !self.app.composer.draft().cursor_on_first_line() {
            self.app.composer.draft_mut().move_cursor_line_up();
            return;
        }
        let history = self.app.sent_history();
        let current = self.app.composer.draft().text().to_owned();
        if let NavOutcome::Moved(text) = self.app.nav.up(&history, &current) {
            self.show_recalled(text);
        }
    }

    /// Down arrow: newer history from the last line, otherwise move the
    /// caret. Stepping past the newest entry restores the stashed draft.
    pub fn down(&mut self) {
        if !self.app.composer.draft().cursor_on_last_line() {
            self.app.composer.draft_mut().move_cursor_line_down();
            return;
        }
        let history = self.app.sent_history();
        if let NavOutcome::Moved(text) = self.app.nav.down(&history) {
            self.show_recalled(text);
        }
    }

    fn show_recalled(&mut self, text: String) {
        self.app.composer.draft_mut().set_text(text);
        self.app.mark_draft_dirty();
    }

    /// Ctrl-R: replace the draft with the best history match for it. An
    /// empty draft recalls the most used template instead.
    pub fn recall_match(&mut self) -> bool {
        let query = self.app.composer.draft().text().trim().to_owned();
        let found = self.app.queue.with_store(|store| {
            if query.is_empty() {
                store.templates().into_iter().next()
            } else {
                store
                    .search(&query, None)
                    .into_iter()
                    .find(|e| e.content != query)
            }
        });
        let Some(entry) = found else {
            self.app.push_status(if query.is_empty() {
                "No templates saved"
            } else {
                "No matching prompt"
            });
            return false;
        };
        self.app.queue.edit_history(|h| h.mark_used(&entry.id));
        self.app.nav.reset();
        self.show_recalled(entry.content);
        true
    }

    /// Ctrl-P: pin or unpin the history entry being browsed.
    pub fn toggle_pin(&mut self) -> bool {
        let Some(entry) = self.browsed_entry() else {
            return false;
        };
        let pinned = !entry.pinned;
        self.app.queue.edit_history(|h| h.set_pinned(&entry.id, pinned));
        self.app.push_status(if pinned { "Pinned" } else { "Unpinned" });
        true
    }

    /// Ctrl-T: mark or unmark the history entry being browsed as a template.
    pub fn toggle_template(&mut self) -> bool {
        let Some(entry) = self.browsed_entry() else {
            return false;
        };
        let is_template = !entry.is_template;
        self.app
            .queue
            .edit_history(|h| h.set_template(&entry.id, is_template));
        self.app.push_status(if is_template {
            "Saved as template"
        } else {
            "Template removed"
        });
        true
    }

    fn browsed_entry(&self) -> Option<promptq_types::QueueEntry> {
        let index = self.app.nav.position()?;
        self.app.sent_history().get(index).cloned()
    }

    /// Queue the draft. Blank drafts are left untouched.
    pub fn submit(self) -> bool {
        let text = self.app.composer.draft().text().to_owned();
        let Some(id) = self.app.queue.enqueue(&text) else {
            return false;
        };
        self.app.composer.draft_mut().clear();
        self.app.nav.reset();
        self.app.draft_dirty_since = None;
        tracing::debug!(entry_id = %id, "Draft submitted");
        true
    }
}

// ============================================================================
// Queue panel
// ============================================================================

impl QueueFocus<'_> {
    fn selected(&self) -> usize {
        self.app.composer.selected().unwrap_or(0)
    }

    fn selected_entry(&self) -> Option<(promptq_types::EntryId, String)> {
        let snapshot = self.app.queue.snapshot();
        snapshot
            .queue
            .get(self.selected())
            .map(|e| (e.id.clone(), e.content.clone()))
    }

    pub fn move_up(&mut self) {
        if let Some(selected) = self.app.composer.selected_mut() {
            *selected = selected.saturating_sub(1);
        }
    }

    pub fn move_down(&mut self) {
        let len = self.app.queue.snapshot().queue.len();
        if let Some(selected) = self.app.composer.selected_mut()
            && *selected + 1 < len
        {
            *selected += 1;
        }
    }

    /// Open the selected entry for inline edit.
    pub fn begin_edit(self) {
        let Some((id, content)) = self.selected_entry() else {
            return;
        };
        if !self.app.queue.begin_edit(&id) {
            self.app.push_status("Entry is being sent and cannot be edited");
            return;
        }
        let selected = self.selected();
        let composer = std::mem::take(&mut self.app.composer);
        self.app.composer = composer.into_edit(selected, QueueEdit::new(id, &content));
    }

    pub fn remove_selected(&mut self) {
        let Some((id, _)) = self.selected_entry() else {
            return;
        };
        match self.app.queue.remove_from_queue(&id) {
            Removal::Removed => self.app.push_status("Removed from queue"),
            Removal::Deferred => self.app.push_status("Sending; it will be dropped when done"),
            Removal::NotFound => {}
        }
    }

    pub fn retry_selected(&mut self) {
        let Some((id, _)) = self.selected_entry() else {
            return;
        };
        if self.app.queue.retry_now(&id) {
            self.app.push_status("Retrying now");
        } else {
            self.app.push_status("Only failed entries can be retried");
        }
    }

    pub fn leave(self) {
        self.app.focus_compose();
    }
}

// ============================================================================
// Inline edit
// ============================================================================

impl EditMode<'_> {
    fn buffer(&mut self) -> Option<&mut DraftInput> {
        match self.app.composer.edit_mut() {
            EditMut::Active(edit) => Some(&mut edit.buffer),
            EditMut::Inactive => None,
        }
    }

    fn with_buffer(&mut self, f: impl FnOnce(&mut DraftInput)) {
        if let Some(buffer) = self.buffer() {
            f(buffer);
        }
    }

    pub fn move_cursor_left(&mut self) {
        self.with_buffer(DraftInput::move_cursor_left);
    }

    pub fn move_cursor_right(&mut self) {
        self.with_buffer(DraftInput::move_cursor_right);
    }

    pub fn move_cursor_line_up(&mut self) {
        self.with_buffer(DraftInput::move_cursor_line_up);
    }

    pub fn move_cursor_line_down(&mut self) {
        self.with_buffer(DraftInput::move_cursor_line_down);
    }

    pub fn reset_cursor(&mut self) {
        self.with_buffer(DraftInput::reset_cursor);
    }

    pub fn move_cursor_end(&mut self) {
        self.with_buffer(DraftInput::move_cursor_end);
    }

    pub fn enter_char(&mut self, c: char) {
        self.with_buffer(|b| b.enter_char(c));
    }

    pub fn enter_newline(&mut self) {
        self.with_buffer(DraftInput::enter_newline);
    }

    pub fn enter_text(&mut self, text: &str) {
        self.with_buffer(|b| b.enter_text(text));
    }

    pub fn delete_char(&mut self) {
        self.with_buffer(DraftInput::delete_char);
    }

    pub fn delete_char_forward(&mut self) {
        self.with_buffer(DraftInput::delete_char_forward);
    }

    pub fn delete_word_backwards(&mut self) {
        self.with_buffer(DraftInput::delete_word_backwards);
    }

    /// Write the buffer back to the entry. A blank buffer removes it.
    pub fn commit(self) {
        let app = self.app;
        let Some(edit) = take_edit(app) else {
            return;
        };
        if edit.is_modified() {
            match app.queue.update_content(&edit.entry, edit.buffer.text()) {
                ContentUpdate::Updated => app.push_status("Entry updated"),
                ContentUpdate::Removed => app.push_status("Empty entry removed"),
                ContentUpdate::NotEditable => app.push_status("Entry can no longer be edited"),
                ContentUpdate::NotFound => app.push_status("Entry is no longer queued"),
            }
        }
        app.queue.end_edit();
    }

    /// Drop the buffer, leaving the entry as it was.
    pub fn cancel(self) {
        let app = self.app;
        take_edit(app);
        app.queue.end_edit();
    }
}

fn take_edit(app: &mut App) -> Option<QueueEdit> {
    let composer = std::mem::take(&mut app.composer);
    let (composer, edit) = composer.take_edit();
    app.composer = composer;
    edit
}
