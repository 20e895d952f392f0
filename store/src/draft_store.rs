//! Draft, queue, and history storage bound to one session.

use std::fs;
use std::path::{Path, PathBuf};

use promptq_types::{EntryId, EntryStatus, QueueEntry, UnixMillis};
use tracing::{debug, info, warn};

use crate::session::{SessionFile, StoreError, session_file_name};

pub const DEFAULT_SEARCH_LIMIT: usize = 50;
pub const MAX_SEARCH_LIMIT: usize = 100;

#[derive(Debug)]
enum Backend {
    File(PathBuf),
    /// No disk: either chosen up front or after a persistence failure.
    Memory,
}

/// Owns the draft text, the outgoing queue, and sent history for a session.
///
/// Every mutation is written through to disk. The first IO failure flips the
/// store into memory-only mode for the rest of the process; callers are never
/// shown the error.
#[derive(Debug)]
pub struct DraftStore {
    backend: Backend,
    state: SessionFile,
    history_limit: usize,
}

impl DraftStore {
    /// Open `<sessions_dir>/<session>.json`, recovering whatever was there.
    pub fn open(sessions_dir: &Path, session: &str, history_limit: usize) -> Self {
        let path = sessions_dir.join(session_file_name(session));
        let mut backend = Backend::File(path.clone());

        let mut state = match SessionFile::read(&path) {
            Ok(Some(state)) => {
                debug!(path = %path.display(), "Loaded session");
                state
            }
            Ok(None) => SessionFile::new(),
            Err(err @ (StoreError::Parse { .. } | StoreError::Incompatible { .. })) => {
                warn!("{err}; starting a fresh session");
                set_aside(&path);
                SessionFile::new()
            }
            Err(err) => {
                warn!("{err}; session will not be saved");
                backend = Backend::Memory;
                SessionFile::new()
            }
        };

        let requeued = state.recover();
        if requeued > 0 {
            info!(requeued, "Requeued prompts interrupted mid-send");
        }

        let mut store = Self {
            backend,
            state,
            history_limit: history_limit.max(1),
        };
        store.trim_history();
        store
    }

    #[must_use]
    pub fn in_memory(history_limit: usize) -> Self {
        Self {
            backend: Backend::Memory,
            state: SessionFile::new(),
            history_limit: history_limit.max(1),
        }
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::File(_))
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File(path) => Some(path),
            Backend::Memory => None,
        }
    }

    // ------------------------------------------------------------------
    // Draft
    // ------------------------------------------------------------------

    #[must_use]
    pub fn draft(&self) -> &str {
        &self.state.draft
    }

    pub fn set_draft(&mut self, text: &str) {
        if self.state.draft == text {
            return;
        }
        self.state.draft = text.to_owned();
        self.persist();
    }

    pub fn clear_draft(&mut self) {
        self.set_draft("");
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Entries not yet sent, in enqueue order.
    #[must_use]
    pub fn queue(&self) -> &[QueueEntry] {
        &self.state.queue
    }

    /// Sent entries, oldest first.
    #[must_use]
    pub fn sent(&self) -> &[QueueEntry] {
        &self.state.history
    }

    /// Queue entries followed by sent history, most recent last.
    #[must_use]
    pub fn history(&self) -> Vec<QueueEntry> {
        self.state
            .history
            .iter()
            .chain(self.state.queue.iter())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn queued(&self, id: &EntryId) -> Option<&QueueEntry> {
        self.state.queue.iter().find(|e| &e.id == id)
    }

    pub fn push_queued(&mut self, entry: QueueEntry) {
        self.state.queue.push(entry);
        self.persist();
    }

    pub fn remove_queued(&mut self, id: &EntryId) -> Option<QueueEntry> {
        let idx = self.state.queue.iter().position(|e| &e.id == id)?;
        let removed = self.state.queue.remove(idx);
        self.persist();
        Some(removed)
    }

    /// Apply `f` to a queued entry and persist. Returns false if absent.
    pub fn update_queued(&mut self, id: &EntryId, f: impl FnOnce(&mut QueueEntry)) -> bool {
        let Some(entry) = self.state.queue.iter_mut().find(|e| &e.id == id) else {
            return false;
        };
        f(entry);
        self.persist();
        true
    }

    /// Move a delivered entry out of the queue into history.
    ///
    /// Sending the same text as the newest history entry bumps that entry's
    /// usage instead of adding a duplicate.
    pub fn record_sent(&mut self, id: &EntryId, now: UnixMillis) -> bool {
        let Some(idx) = self.state.queue.iter().position(|e| &e.id == id) else {
            return false;
        };
        let mut entry = self.state.queue.remove(idx);
        entry.status = EntryStatus::Sent;
        entry.last_error = None;

        match self.state.history.last_mut() {
            Some(last) if last.content == entry.content => last.mark_used(now),
            _ => self.state.history.push(entry),
        }
        self.trim_history();
        self.persist();
        true
    }

    // ------------------------------------------------------------------
    // History organisation
    // ------------------------------------------------------------------

    pub fn set_pinned(&mut self, id: &EntryId, pinned: bool) -> bool {
        self.update_any(id, |e| e.pinned = pinned)
    }

    pub fn set_template(&mut self, id: &EntryId, is_template: bool) -> bool {
        self.update_any(id, |e| e.is_template = is_template)
    }

    /// Replace an entry's tags. Blank and repeated tags are dropped.
    pub fn set_tags(&mut self, id: &EntryId, tags: Vec<String>) -> bool {
        let mut clean: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            let tag = tag.trim();
            if !tag.is_empty() && !clean.iter().any(|t| t == tag) {
                clean.push(tag.to_owned());
            }
        }
        self.update_any(id, |e| e.tags = clean)
    }

    /// Record that the user reused an entry.
    pub fn mark_used(&mut self, id: &EntryId, now: UnixMillis) -> bool {
        self.update_any(id, |e| e.mark_used(now))
    }

    /// Pinned entries, newest first.
    #[must_use]
    pub fn pinned(&self) -> Vec<QueueEntry> {
        let mut out: Vec<QueueEntry> = self.all().filter(|e| e.pinned).cloned().collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    /// Templates, most used first, then newest.
    #[must_use]
    pub fn templates(&self) -> Vec<QueueEntry> {
        let mut out: Vec<QueueEntry> = self.all().filter(|e| e.is_template).cloned().collect();
        out.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then(b.timestamp.cmp(&a.timestamp))
        });
        out
    }

    /// Case-insensitive substring search over queue and history.
    ///
    /// Ranked pinned first, then by usage, then newest. `limit` defaults to
    /// [`DEFAULT_SEARCH_LIMIT`] and is clamped to `1..=MAX_SEARCH_LIMIT`.
    #[must_use]
    pub fn search(&self, query: &str, limit: Option<usize>) -> Vec<QueueEntry> {
        let limit = limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        let needle = query.trim().to_lowercase();

        let mut out: Vec<QueueEntry> = self
            .all()
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then(b.usage_count.cmp(&a.usage_count))
                .then(b.timestamp.cmp(&a.timestamp))
        });
        out.truncate(limit);
        out
    }

    /// Union-merge entries from the backend into sent history.
    ///
    /// Entries already known locally (by id) are left alone. Only delivered
    /// entries are imported; a prompt still queued elsewhere belongs to that
    /// client's queue. Returns how many entries were added.
    pub fn merge_remote(&mut self, remote: Vec<QueueEntry>) -> usize {
        let mut added = 0;
        for mut entry in remote {
            if entry.status != EntryStatus::Sent || self.all().any(|e| e.id == entry.id) {
                continue;
            }
            entry.last_error = None;
            self.state.history.push(entry);
            added += 1;
        }
        if added > 0 {
            self.state.history.sort_by_key(|e| e.timestamp);
            self.trim_history();
            self.persist();
        }
        added
    }

    fn all(&self) -> impl Iterator<Item = &QueueEntry> {
        self.state.queue.iter().chain(self.state.history.iter())
    }

    fn update_any(&mut self, id: &EntryId, f: impl FnOnce(&mut QueueEntry)) -> bool {
        let Some(entry) = self
            .state
            .queue
            .iter_mut()
            .chain(self.state.history.iter_mut())
            .find(|e| &e.id == id)
        else {
            return false;
        };
        f(entry);
        self.persist();
        true
    }

    fn trim_history(&mut self) {
        let len = self.state.history.len();
        if len > self.history_limit {
            self.state.history.drain(..len - self.history_limit);
        }
    }

    fn persist(&mut self) {
        let Backend::File(path) = &self.backend else {
            return;
        };
        if let Err(err) = self.state.write(path) {
            warn!("{err}; continuing without saving this session");
            self.backend = Backend::Memory;
        }
    }
}

/// Keep an unreadable session file around as `<name>.corrupt`.
fn set_aside(path: &Path) {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    let target = path.with_file_name(name);
    if let Err(e) = fs::rename(path, &target) {
        warn!(path = %path.display(), "Failed to move unreadable session aside: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{DraftStore, MAX_SEARCH_LIMIT};
    use promptq_types::{EntryId, EntryStatus, NonEmptyString, QueueEntry, UnixMillis};

    fn entry(id: &str, content: &str, ts: i64) -> QueueEntry {
        QueueEntry::new(
            EntryId::new(id),
            NonEmptyString::new(content).unwrap(),
            UnixMillis(ts),
        )
    }

    fn sent_store(items: &[(&str, &str, i64)]) -> DraftStore {
        let mut store = DraftStore::in_memory(100);
        for (id, content, ts) in items {
            store.push_queued(entry(id, content, *ts));
            store.record_sent(&EntryId::new(*id), UnixMillis(*ts));
        }
        store
    }

    #[test]
    fn draft_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = DraftStore::open(dir.path(), "s", 100);
            assert!(store.is_persistent());
            store.set_draft("work in progress");
        }
        let store = DraftStore::open(dir.path(), "s", 100);
        assert_eq!(store.draft(), "work in progress");
    }

    #[test]
    fn reload_recovers_queue_statuses_and_history() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = DraftStore::open(dir.path(), "s", 100);
            store.push_queued(entry("a", "first", 1));
            store.push_queued(entry("b", "second", 2));
            store.push_queued(entry("c", "third", 3));
            store.record_sent(&EntryId::new("a"), UnixMillis(10));
            store.update_queued(&EntryId::new("b"), |e| {
                e.status = EntryStatus::Failed;
                e.attempts = 2;
                e.last_error = Some("503".into());
            });
            store.update_queued(&EntryId::new("c"), |e| e.status = EntryStatus::Sending);
            store.set_draft("draft");
        }

        let store = DraftStore::open(dir.path(), "s", 100);
        assert_eq!(store.draft(), "draft");
        let queue: Vec<_> = store
            .queue()
            .iter()
            .map(|e| (e.id.as_str(), e.status, e.attempts))
            .collect();
        assert_eq!(
            queue,
            vec![
                ("b", EntryStatus::Failed, 2),
                // Interrupted mid-send: delivered again.
                ("c", EntryStatus::Pending, 0),
            ]
        );
        assert_eq!(store.sent().len(), 1);
        assert_eq!(store.sent()[0].content, "first");
        assert_eq!(store.sent()[0].status, EntryStatus::Sent);
    }

    #[test]
    fn corrupt_file_is_set_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, "{{{{").unwrap();

        let store = DraftStore::open(dir.path(), "s", 100);
        assert!(store.is_persistent());
        assert_eq!(store.draft(), "");
        assert!(dir.path().join("s.json.corrupt").exists());
    }

    #[test]
    fn unwritable_dir_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the sessions directory should be.
        let blocker = dir.path().join("sessions");
        fs::write(&blocker, "not a dir").unwrap();

        let mut store = DraftStore::open(&blocker, "s", 100);
        store.set_draft("still works");
        assert!(!store.is_persistent());
        assert_eq!(store.draft(), "still works");

        store.push_queued(entry("a", "queued", 1));
        assert_eq!(store.queue().len(), 1);
    }

    #[test]
    fn history_lists_sent_then_queued() {
        let mut store = sent_store(&[("a", "one", 1)]);
        store.push_queued(entry("b", "two", 2));

        let contents: Vec<_> = store.history().into_iter().map(|e| e.content).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[test]
    fn history_is_bounded() {
        let mut store = DraftStore::in_memory(2);
        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            let id = format!("e{i}");
            store.push_queued(entry(&id, text, i as i64));
            store.record_sent(&EntryId::new(id), UnixMillis(i as i64));
        }
        let kept: Vec<_> = store.sent().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(kept, vec!["b", "c"]);
    }

    #[test]
    fn repeated_send_bumps_usage() {
        let store = sent_store(&[("a", "same", 1), ("b", "same", 2)]);
        assert_eq!(store.sent().len(), 1);
        assert_eq!(store.sent()[0].usage_count, 1);
        assert_eq!(store.sent()[0].last_used_at, Some(UnixMillis(2)));
    }

    #[test]
    fn remove_and_update_missing_entries() {
        let mut store = DraftStore::in_memory(10);
        assert!(store.remove_queued(&EntryId::new("x")).is_none());
        assert!(!store.update_queued(&EntryId::new("x"), |_| {}));
        assert!(!store.record_sent(&EntryId::new("x"), UnixMillis(0)));
    }

    #[test]
    fn search_ranks_pinned_then_usage_then_recency() {
        let mut store = sent_store(&[
            ("a", "fix the build", 1),
            ("b", "Fix tests", 2),
            ("c", "unrelated", 3),
            ("d", "fix docs", 4),
        ]);
        store.set_pinned(&EntryId::new("a"), true);
        store.mark_used(&EntryId::new("b"), UnixMillis(5));

        let ids: Vec<_> = store
            .search("FIX", None)
            .into_iter()
            .map(|e| e.id.as_str().to_owned())
            .collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
    }

    #[test]
    fn search_limit_is_clamped() {
        let items: Vec<(String, i64)> = (0..120).map(|i| (format!("e{i}"), i)).collect();
        let mut store = DraftStore::in_memory(200);
        for (id, ts) in &items {
            store.push_queued(entry(id, &format!("prompt {id}"), *ts));
            store.record_sent(&EntryId::new(id.as_str()), UnixMillis(*ts));
        }
        assert_eq!(store.search("prompt", None).len(), 50);
        assert_eq!(store.search("prompt", Some(0)).len(), 1);
        assert_eq!(store.search("prompt", Some(500)).len(), MAX_SEARCH_LIMIT);
    }

    #[test]
    fn templates_order_by_usage_then_recency() {
        let mut store = sent_store(&[("a", "t1", 1), ("b", "t2", 2), ("c", "t3", 3)]);
        for id in ["a", "b", "c"] {
            store.set_template(&EntryId::new(id), true);
        }
        store.mark_used(&EntryId::new("a"), UnixMillis(9));

        let ids: Vec<_> = store
            .templates()
            .into_iter()
            .map(|e| e.id.as_str().to_owned())
            .collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn tags_are_cleaned() {
        let mut store = sent_store(&[("a", "x", 1)]);
        store.set_tags(
            &EntryId::new("a"),
            vec![" bug ".into(), String::new(), "bug".into(), "ui".into()],
        );
        assert_eq!(store.sent()[0].tags, vec!["bug", "ui"]);
    }

    #[test]
    fn merge_remote_is_union_and_local_wins() {
        let mut store = sent_store(&[("a", "local", 5)]);

        let mut conflicting = entry("a", "remote edit", 5);
        conflicting.status = EntryStatus::Sent;
        let mut older = entry("r1", "from laptop", 1);
        older.status = EntryStatus::Sent;
        let still_queued = entry("r2", "queued elsewhere", 7);

        let added = store.merge_remote(vec![conflicting, older, still_queued]);
        assert_eq!(added, 1);

        let contents: Vec<_> = store.sent().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["from laptop", "local"]);
        assert!(store.queue().is_empty());
    }
}
