//! Queue entries and their delivery status.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{EntryId, NonEmptyString};

/// Milliseconds since the Unix epoch.
///
/// Matches the timestamp unit used by the prompt-history sync API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UnixMillis(pub i64);

impl UnixMillis {
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

/// Delivery status of a queue entry.
///
/// ```text
/// Pending -> Sending -> Sent
///               |
///               v
///            Failed -> Sending -> ...
/// ```
///
/// `Failed` entries are retried directly; there is no `Failed -> Pending` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    #[default]
    Pending,
    Sending,
    Sent,
    Failed,
}

impl EntryStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Content may only change while the entry is waiting for (re)dispatch.
    #[must_use]
    pub const fn is_editable(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn default_interrupt() -> bool {
    true
}

/// One prompt awaiting or having completed delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub content: String,
    pub status: EntryStatus,
    /// Creation time.
    pub timestamp: UnixMillis,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub last_used_at: Option<UnixMillis>,
    /// Dispatch attempts made so far (successful or not).
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Target chat session, when known.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Whether the agent should be interrupted to handle this prompt.
    #[serde(default = "default_interrupt")]
    pub interrupt: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_template: bool,
}

impl QueueEntry {
    #[must_use]
    pub fn new(id: EntryId, content: NonEmptyString, now: UnixMillis) -> Self {
        Self {
            id,
            content: content.into_inner(),
            status: EntryStatus::Pending,
            timestamp: now,
            usage_count: 0,
            last_used_at: None,
            attempts: 0,
            last_error: None,
            session_id: None,
            interrupt: true,
            pinned: false,
            tags: Vec::new(),
            is_template: false,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    #[must_use]
    pub fn with_interrupt(mut self, interrupt: bool) -> Self {
        self.interrupt = interrupt;
        self
    }

    #[must_use]
    pub fn is_editable(&self) -> bool {
        self.status.is_editable()
    }

    /// Record one reuse of this entry from history.
    pub fn mark_used(&mut self, now: UnixMillis) {
        self.usage_count = self.usage_count.saturating_add(1);
        self.last_used_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::{EntryStatus, QueueEntry, UnixMillis};
    use crate::{EntryId, NonEmptyString};

    fn entry(content: &str) -> QueueEntry {
        QueueEntry::new(
            EntryId::new("e1"),
            NonEmptyString::new(content).unwrap(),
            UnixMillis(1_700_000_000_000),
        )
    }

    #[test]
    fn new_entry_is_pending_and_interrupting() {
        let e = entry("hello");
        assert_eq!(e.status, EntryStatus::Pending);
        assert!(e.interrupt);
        assert_eq!(e.attempts, 0);
        assert!(e.is_editable());
    }

    #[test]
    fn editable_only_while_waiting() {
        assert!(EntryStatus::Pending.is_editable());
        assert!(EntryStatus::Failed.is_editable());
        assert!(!EntryStatus::Sending.is_editable());
        assert!(!EntryStatus::Sent.is_editable());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&EntryStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let json = r#"{"id":"x","content":"hi","status":"pending","timestamp":5}"#;
        let e: QueueEntry = serde_json::from_str(json).unwrap();
        assert!(e.interrupt);
        assert!(!e.pinned);
        assert!(e.tags.is_empty());
        assert_eq!(e.usage_count, 0);
    }

    #[test]
    fn mark_used_counts_and_stamps() {
        let mut e = entry("hello");
        e.mark_used(UnixMillis(10));
        e.mark_used(UnixMillis(20));
        assert_eq!(e.usage_count, 2);
        assert_eq!(e.last_used_at, Some(UnixMillis(20)));
    }
}
