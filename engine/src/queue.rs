//! Single-flight prompt queue.
//!
//! One driver task owns dispatch. It picks the next eligible entry (failed
//! entries first, then pending, both in enqueue order), marks it `sending`,
//! awaits the injected [`PromptSender`], records the result, waits
//! `dispatch_delay`, and goes again. When nothing is eligible it sleeps until
//! it is woken by a queue change, a network change, or the earliest backoff
//! deadline.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`. Only the driver calls the sender, so at most one entry is ever
//! `sending`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use promptq_store::DraftStore;
use promptq_types::{EntryId, EntryStatus, NonEmptyString, QueueEntry, UnixMillis};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::network::NetworkMonitor;
use crate::retry::RetryPolicy;
use crate::sender::{OutboundPrompt, PromptSender, SendError};

/// Wall clock in Unix milliseconds.
#[must_use]
pub fn now_millis() -> UnixMillis {
    UnixMillis(chrono::Utc::now().timestamp_millis())
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Pause after each settled send before selecting the next entry.
    pub dispatch_delay: Duration,
    pub retry: RetryPolicy,
    /// Stamped onto new entries as their target chat session.
    pub session_id: Option<String>,
    /// Start paused (see [`QueueManager::set_disabled`]).
    pub start_disabled: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            dispatch_delay: Duration::from_millis(100),
            retry: RetryPolicy::default(),
            session_id: None,
            start_disabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// The entry is mid-send; it will be dropped when the send settles.
    Deferred,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentUpdate {
    Updated,
    /// New content was blank, so the entry was removed.
    Removed,
    /// The entry is `sending` (or already sent) and cannot change.
    NotEditable,
    NotFound,
}

/// Read-only view for rendering.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub draft: String,
    pub queue: Vec<QueueEntry>,
    /// Sent entries, oldest first.
    pub history: Vec<QueueEntry>,
    pub in_flight: Option<EntryId>,
    pub editing: Option<EntryId>,
    /// Failed entries that ran out of attempts. They wait for `retry_now`
    /// or an edit.
    pub parked: Vec<EntryId>,
    pub disabled: bool,
    pub online: bool,
    pub persistent: bool,
}

impl QueueSnapshot {
    #[must_use]
    pub fn is_parked(&self, id: &EntryId) -> bool {
        self.parked.contains(id)
    }
}

struct QueueState {
    store: DraftStore,
    in_flight: Option<EntryId>,
    editing: Option<EntryId>,
    /// Removed while sending; dropped once the send settles.
    discard: HashSet<EntryId>,
    /// Earliest time each failed entry may be retried. Not persisted.
    backoff: HashMap<EntryId, Instant>,
    disabled: bool,
}

impl QueueState {
    fn forget(&mut self, id: &EntryId) {
        self.backoff.remove(id);
        self.discard.remove(id);
        if self.editing.as_ref() == Some(id) {
            self.editing = None;
        }
    }
}

enum Step {
    Send(OutboundPrompt),
    /// Nothing to do; wait for a wake-up or until the deadline.
    Idle(Option<Instant>),
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Notify,
    changes: watch::Sender<u64>,
    sender: Arc<dyn PromptSender>,
    network: NetworkMonitor,
    options: QueueOptions,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn changed(&self) {
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Pick the next entry and mark it `sending`, or say how long to idle.
    fn next_step(&self) -> Step {
        let mut state = self.lock();
        if state.disabled || !self.network.is_online() || state.in_flight.is_some() {
            return Step::Idle(None);
        }

        let now = Instant::now();
        let mut chosen: Option<EntryId> = None;

        let failed = state
            .store
            .queue()
            .iter()
            .filter(|e| e.status == EntryStatus::Failed);
        let pending = state
            .store
            .queue()
            .iter()
            .filter(|e| e.status == EntryStatus::Pending);

        for entry in failed.chain(pending) {
            if state.editing.as_ref() == Some(&entry.id) {
                continue;
            }
            if entry.status == EntryStatus::Failed {
                if self.options.retry.is_exhausted(entry.attempts) {
                    continue;
                }
                // A failed entry waiting out its backoff holds back everything
                // queued behind it.
                if let Some(&at) = state.backoff.get(&entry.id)
                    && at > now
                {
                    return Step::Idle(Some(at));
                }
            }
            chosen = Some(entry.id.clone());
            break;
        }

        let Some(id) = chosen else {
            return Step::Idle(None);
        };

        let mut prompt = None;
        state.store.update_queued(&id, |entry| {
            entry.status = EntryStatus::Sending;
            entry.attempts = entry.attempts.saturating_add(1);
            prompt = Some(OutboundPrompt {
                id: entry.id.clone(),
                content: entry.content.clone(),
                session_id: entry.session_id.clone(),
                interrupt: entry.interrupt,
                attempt: entry.attempts,
            });
        });
        let Some(prompt) = prompt else {
            return Step::Idle(None);
        };
        state.in_flight = Some(id);
        state.backoff.remove(&prompt.id);
        drop(state);

        debug!(entry_id = %prompt.id, attempt = prompt.attempt, "Dispatching prompt");
        self.changed();
        Step::Send(prompt)
    }

    fn settle(&self, id: &EntryId, result: Result<(), SendError>) {
        let mut state = self.lock();
        state.in_flight = None;

        if state.discard.remove(id) {
            state.store.remove_queued(id);
            state.forget(id);
            drop(state);
            info!(entry_id = %id, "Dropped prompt removed while sending");
            self.changed();
            return;
        }

        match result {
            Ok(()) => {
                state.store.record_sent(id, now_millis());
                state.forget(id);
                drop(state);
                info!(entry_id = %id, "Prompt sent");
            }
            Err(err) => {
                let message = err.to_string();
                let mut attempts = 0;
                state.store.update_queued(id, |entry| {
                    entry.status = EntryStatus::Failed;
                    entry.last_error = Some(message.clone());
                    attempts = entry.attempts;
                });

                let policy = &self.options.retry;
                if policy.is_exhausted(attempts) {
                    drop(state);
                    warn!(
                        entry_id = %id,
                        attempt = attempts,
                        error = %message,
                        "Prompt failed; out of attempts"
                    );
                } else {
                    let delay = policy.delay_after(attempts, err.retry_after());
                    state.backoff.insert(id.clone(), Instant::now() + delay);
                    drop(state);
                    warn!(
                        entry_id = %id,
                        attempt = attempts,
                        delay_ms = delay.as_millis(),
                        retryable = err.is_retryable(),
                        error = %message,
                        "Prompt failed; will retry"
                    );
                }
            }
        }
        self.changed();
    }
}

async fn drive(shared: Arc<Shared>) {
    let mut network = shared.network.subscribe();
    loop {
        match shared.next_step() {
            Step::Send(prompt) => {
                let id = prompt.id.clone();
                let result = shared.sender.send(prompt).await;
                shared.settle(&id, result);
                tokio::time::sleep(shared.options.dispatch_delay).await;
            }
            Step::Idle(deadline) => {
                let backoff = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    () = shared.wake.notified() => {}
                    _ = network.changed() => {}
                    () = backoff => {}
                }
            }
        }
    }
}

struct DriverGuard(JoinHandle<()>);

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle to the prompt queue. Clones share the same queue.
///
/// The dispatch driver stops when the last handle is dropped.
#[derive(Clone)]
pub struct QueueManager {
    shared: Arc<Shared>,
    _driver: Arc<DriverGuard>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    /// Start the queue over `store`. Must be called inside a tokio runtime.
    pub fn start(
        store: DraftStore,
        sender: impl PromptSender,
        network: NetworkMonitor,
        options: QueueOptions,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                store,
                in_flight: None,
                editing: None,
                discard: HashSet::new(),
                backoff: HashMap::new(),
                disabled: options.start_disabled,
            }),
            wake: Notify::new(),
            changes,
            sender: Arc::new(sender),
            network,
            options,
        });
        let handle = tokio::spawn(drive(Arc::clone(&shared)));
        Self {
            shared,
            _driver: Arc::new(DriverGuard(handle)),
        }
    }

    /// Queue `content` for delivery and clear the draft.
    ///
    /// Blank content is ignored: no entry is created and the draft is left
    /// alone.
    pub fn enqueue(&self, content: &str) -> Option<EntryId> {
        let content = NonEmptyString::new(content.trim()).ok()?;
        let id = EntryId::new(Uuid::new_v4().to_string());
        let entry = QueueEntry::new(id.clone(), content, now_millis())
            .with_session(self.shared.options.session_id.clone());

        {
            let mut state = self.shared.lock();
            state.store.push_queued(entry);
            state.store.clear_draft();
        }
        debug!(entry_id = %id, "Prompt queued");
        self.shared.changed();
        self.process_queue();
        Some(id)
    }

    pub fn remove_from_queue(&self, id: &EntryId) -> Removal {
        let mut state = self.shared.lock();
        if state.in_flight.as_ref() == Some(id) {
            state.discard.insert(id.clone());
            return Removal::Deferred;
        }
        if state.store.remove_queued(id).is_none() {
            return Removal::NotFound;
        }
        state.forget(id);
        drop(state);
        self.shared.changed();
        Removal::Removed
    }

    /// Replace the text of a `pending` or `failed` entry.
    ///
    /// Blank text removes the entry. A changed entry starts over with a clean
    /// attempt count.
    pub fn update_content(&self, id: &EntryId, content: &str) -> ContentUpdate {
        let mut state = self.shared.lock();
        let editable = match state.store.queued(id) {
            None => return ContentUpdate::NotFound,
            Some(entry) => entry.is_editable() && state.in_flight.as_ref() != Some(id),
        };
        if !editable {
            return ContentUpdate::NotEditable;
        }

        let trimmed = content.trim();
        let outcome = if trimmed.is_empty() {
            state.store.remove_queued(id);
            state.forget(id);
            ContentUpdate::Removed
        } else {
            state.store.update_queued(id, |entry| {
                entry.content = trimmed.to_owned();
                entry.attempts = 0;
                entry.last_error = None;
            });
            state.backoff.remove(id);
            ContentUpdate::Updated
        };
        drop(state);

        self.shared.changed();
        self.process_queue();
        outcome
    }

    /// Hold `id` out of dispatch while the user edits it.
    ///
    /// Refused for entries that are missing or already sending.
    pub fn begin_edit(&self, id: &EntryId) -> bool {
        let mut state = self.shared.lock();
        let allowed = state.in_flight.as_ref() != Some(id)
            && state.store.queued(id).is_some_and(QueueEntry::is_editable);
        if allowed {
            state.editing = Some(id.clone());
        }
        drop(state);
        if allowed {
            self.shared.changed();
        }
        allowed
    }

    pub fn end_edit(&self) {
        let ended = self.shared.lock().editing.take().is_some();
        if ended {
            self.shared.changed();
            self.process_queue();
        }
    }

    /// Make a failed entry eligible right away with a fresh attempt count.
    pub fn retry_now(&self, id: &EntryId) -> bool {
        let mut state = self.shared.lock();
        let failed = state
            .store
            .queued(id)
            .is_some_and(|e| e.status == EntryStatus::Failed);
        if !failed {
            return false;
        }
        state.store.update_queued(id, |entry| entry.attempts = 0);
        state.backoff.remove(id);
        drop(state);

        info!(entry_id = %id, "Manual retry");
        self.shared.changed();
        self.process_queue();
        true
    }

    /// Host-level pause. Queued entries stay put while disabled.
    pub fn set_disabled(&self, disabled: bool) {
        self.shared.lock().disabled = disabled;
        self.shared.changed();
        self.process_queue();
    }

    /// Wake the driver so it re-evaluates the queue.
    pub fn process_queue(&self) {
        self.shared.wake.notify_one();
    }

    #[must_use]
    pub fn network(&self) -> &NetworkMonitor {
        &self.shared.network
    }

    /// Bumps on every queue, draft, or status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.shared.lock();
        QueueSnapshot {
            draft: state.store.draft().to_owned(),
            queue: state.store.queue().to_vec(),
            history: state.store.sent().to_vec(),
            in_flight: state.in_flight.clone(),
            editing: state.editing.clone(),
            parked: state
                .store
                .queue()
                .iter()
                .filter(|e| {
                    e.status == EntryStatus::Failed
                        && self.shared.options.retry.is_exhausted(e.attempts)
                })
                .map(|e| e.id.clone())
                .collect(),
            disabled: state.disabled,
            online: self.shared.network.is_online(),
            persistent: state.store.is_persistent(),
        }
    }

    // ------------------------------------------------------------------
    // Draft and history pass-throughs
    // ------------------------------------------------------------------

    #[must_use]
    pub fn draft(&self) -> String {
        self.shared.lock().store.draft().to_owned()
    }

    pub fn set_draft(&self, text: &str) {
        self.shared.lock().store.set_draft(text);
        self.shared.changed();
    }

    pub fn clear_draft(&self) {
        self.set_draft("");
    }

    /// Read access to the store, for history queries.
    pub fn with_store<R>(&self, f: impl FnOnce(&DraftStore) -> R) -> R {
        f(&self.shared.lock().store)
    }

    /// Mutate history metadata (pins, tags, templates, usage).
    ///
    /// Queue membership and status must go through the queue operations.
    pub fn edit_history<R>(&self, f: impl FnOnce(&mut HistoryEditor<'_>) -> R) -> R {
        let result = {
            let mut state = self.shared.lock();
            let mut editor = HistoryEditor {
                store: &mut state.store,
            };
            f(&mut editor)
        };
        self.shared.changed();
        result
    }
}

/// Restricted mutable view of the store handed out by
/// [`QueueManager::edit_history`].
pub struct HistoryEditor<'a> {
    store: &'a mut DraftStore,
}

impl HistoryEditor<'_> {
    pub fn set_pinned(&mut self, id: &EntryId, pinned: bool) -> bool {
        self.store.set_pinned(id, pinned)
    }

    pub fn set_template(&mut self, id: &EntryId, is_template: bool) -> bool {
        self.store.set_template(id, is_template)
    }

    pub fn mark_used(&mut self, id: &EntryId) -> bool {
        self.store.mark_used(id, now_millis())
    }

    pub fn merge_remote(&mut self, entries: Vec<QueueEntry>) -> usize {
        self.store.merge_remote(entries)
    }
}
