//! Composer state and draft editing for the prompt surface.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::EntryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposerMode {
    /// Typing into the draft.
    #[default]
    Compose,
    /// Browsing the queue panel.
    Queue,
    /// Editing a queued entry in place.
    Edit,
}

/// Handles text editing with proper Unicode grapheme cluster support.
///
/// `cursor` counts graphemes, not bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftInput {
    pub(crate) text: String,
    pub(crate) cursor: usize,
}

impl DraftInput {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let mut draft = Self::default();
        draft.set_text(text.into());
        draft
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn take_text(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }

    pub fn move_cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_cursor_right(&mut self) {
        let cursor_moved_right = self.cursor.saturating_add(1);
        self.cursor = self.clamp_cursor(cursor_moved_right);
    }

    pub fn enter_char(&mut self, new_char: char) {
        let index = self.byte_index();
        self.text.insert(index, new_char);
        self.move_cursor_right();
    }

    pub fn enter_newline(&mut self) {
        self.enter_char('\n');
    }

    pub fn enter_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let index = self.byte_index();
        self.text.insert_str(index, text);
        let inserted = text.graphemes(true).count();
        self.cursor = self.clamp_cursor(self.cursor.saturating_add(inserted));
    }

    pub fn delete_char(&mut self) {
        if self.cursor == 0 {
            return;
        }

        let start = self.byte_index_at(self.cursor - 1);
        let end = self.byte_index_at(self.cursor);
        self.text.replace_range(start..end, "");
        self.move_cursor_left();
    }

    pub fn delete_char_forward(&mut self) {
        if self.cursor >= self.grapheme_count() {
            return;
        }

        let start = self.byte_index_at(self.cursor);
        let end = self.byte_index_at(self.cursor + 1);
        self.text.replace_range(start..end, "");
    }

    pub fn delete_word_backwards(&mut self) {
        while self.cursor > 0 && self.grapheme_is_whitespace(self.cursor - 1) {
            self.delete_char();
        }
        while self.cursor > 0 && !self.grapheme_is_whitespace(self.cursor - 1) {
            self.delete_char();
        }
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    pub fn move_cursor_end(&mut self) {
        self.cursor = self.grapheme_count();
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    /// Replace the text and park the cursor at the end.
    pub fn set_text(&mut self, text: String) {
        self.text = text;
        self.cursor = self.grapheme_count();
    }

    /// True when no line break precedes the cursor.
    #[must_use]
    pub fn cursor_on_first_line(&self) -> bool {
        !self.text[..self.byte_index()].contains('\n')
    }

    /// True when no line break follows the cursor.
    #[must_use]
    pub fn cursor_on_last_line(&self) -> bool {
        !self.text[self.byte_index()..].contains('\n')
    }

    /// Move to the same column on the previous line, clamped to its length.
    pub fn move_cursor_line_up(&mut self) {
        let (line, col) = self.line_and_column();
        if line == 0 {
            self.cursor = 0;
            return;
        }
        self.cursor = self.position_of(line - 1, col);
    }

    /// Move to the same column on the next line, clamped to its length.
    pub fn move_cursor_line_down(&mut self) {
        let (line, col) = self.line_and_column();
        let last_line = self.text.split('\n').count().saturating_sub(1);
        if line >= last_line {
            self.move_cursor_end();
            return;
        }
        self.cursor = self.position_of(line + 1, col);
    }

    #[must_use]
    pub fn grapheme_count(&self) -> usize {
        self.text.graphemes(true).count()
    }

    #[must_use]
    pub fn byte_index(&self) -> usize {
        self.byte_index_at(self.cursor)
    }

    /// Zero-based (line, column) of the cursor, both in graphemes.
    #[must_use]
    pub fn line_and_column(&self) -> (usize, usize) {
        let mut line = 0;
        let mut col = 0;
        for grapheme in self.text.graphemes(true).take(self.cursor) {
            if grapheme == "\n" {
                line += 1;
                col = 0;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    fn position_of(&self, target_line: usize, target_col: usize) -> usize {
        let mut line = 0;
        let mut col = 0;
        for (idx, grapheme) in self.text.graphemes(true).enumerate() {
            if line == target_line && (col == target_col || grapheme == "\n") {
                return idx;
            }
            if grapheme == "\n" {
                line += 1;
                col = 0;
            } else {
                col += 1;
            }
        }
        self.grapheme_count()
    }

    fn grapheme_is_whitespace(&self, index: usize) -> bool {
        self.text
            .graphemes(true)
            .nth(index)
            .is_some_and(|grapheme| grapheme.chars().all(char::is_whitespace))
    }

    fn byte_index_at(&self, grapheme_index: usize) -> usize {
        self.text
            .grapheme_indices(true)
            .nth(grapheme_index)
            .map_or(self.text.len(), |(i, _)| i)
    }

    fn clamp_cursor(&self, new_cursor_pos: usize) -> usize {
        new_cursor_pos.min(self.grapheme_count())
    }
}

/// In-place edit of a queued entry.
///
/// `original` is restored on cancel; `buffer` is committed on confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEdit {
    pub entry: EntryId,
    pub original: String,
    pub buffer: DraftInput,
}

impl QueueEdit {
    #[must_use]
    pub fn new(entry: EntryId, content: &str) -> Self {
        Self {
            entry,
            original: content.to_owned(),
            buffer: DraftInput::new(content),
        }
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.buffer.text() != self.original
    }
}

/// Composer state machine.
///
/// The draft survives every transition so switching focus never loses typing.
#[derive(Debug, Clone)]
pub enum ComposerState {
    Compose(DraftInput),
    Queue {
        draft: DraftInput,
        selected: usize,
    },
    Edit {
        draft: DraftInput,
        selected: usize,
        edit: QueueEdit,
    },
}

pub enum EditRef<'a> {
    Active(&'a QueueEdit),
    Inactive,
}

pub enum EditMut<'a> {
    Active(&'a mut QueueEdit),
    Inactive,
}

impl Default for ComposerState {
    fn default() -> Self {
        Self::Compose(DraftInput::default())
    }
}

impl ComposerState {
    #[must_use]
    pub fn mode(&self) -> ComposerMode {
        match self {
            Self::Compose(_) => ComposerMode::Compose,
            Self::Queue { .. } => ComposerMode::Queue,
            Self::Edit { .. } => ComposerMode::Edit,
        }
    }

    #[must_use]
    pub fn draft(&self) -> &DraftInput {
        match self {
            Self::Compose(draft) | Self::Queue { draft, .. } | Self::Edit { draft, .. } => draft,
        }
    }

    pub fn draft_mut(&mut self) -> &mut DraftInput {
        match self {
            Self::Compose(draft) | Self::Queue { draft, .. } | Self::Edit { draft, .. } => draft,
        }
    }

    /// Selected queue row, when the queue panel has focus.
    #[must_use]
    pub fn selected(&self) -> Option<usize> {
        match self {
            Self::Compose(_) => None,
            Self::Queue { selected, .. } | Self::Edit { selected, .. } => Some(*selected),
        }
    }

    pub fn selected_mut(&mut self) -> Option<&mut usize> {
        match self {
            Self::Compose(_) => None,
            Self::Queue { selected, .. } | Self::Edit { selected, .. } => Some(selected),
        }
    }

    #[must_use]
    pub fn edit_ref(&self) -> EditRef<'_> {
        match self {
            Self::Edit { edit, .. } => EditRef::Active(edit),
            _ => EditRef::Inactive,
        }
    }

    pub fn edit_mut(&mut self) -> EditMut<'_> {
        match self {
            Self::Edit { edit, .. } => EditMut::Active(edit),
            _ => EditMut::Inactive,
        }
    }

    #[must_use]
    pub fn into_compose(self) -> Self {
        match self {
            Self::Compose(draft) | Self::Queue { draft, .. } | Self::Edit { draft, .. } => {
                Self::Compose(draft)
            }
        }
    }

    #[must_use]
    pub fn into_queue(self, selected: usize) -> Self {
        match self {
            Self::Compose(draft) | Self::Queue { draft, .. } | Self::Edit { draft, .. } => {
                Self::Queue { draft, selected }
            }
        }
    }

    #[must_use]
    pub fn into_edit(self, selected: usize, edit: QueueEdit) -> Self {
        match self {
            Self::Compose(draft) | Self::Queue { draft, .. } | Self::Edit { draft, .. } => {
                Self::Edit {
                    draft,
                    selected,
                    edit,
                }
            }
        }
    }

    /// Leave edit mode, handing back the edit for commit or discard.
    #[must_use]
    pub fn take_edit(self) -> (Self, Option<QueueEdit>) {
        match self {
            Self::Edit {
                draft,
                selected,
                edit,
            } => (Self::Queue { draft, selected }, Some(edit)),
            other => (other, None),
        }
    }
}
