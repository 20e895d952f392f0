//! Queue engine for promptq.
//!
//! This crate owns everything between the prompt surface and the backend:
//!
//! - [`QueueManager`]: single-flight dispatch of queued prompts over a
//!   [`DraftStore`](promptq_store::DraftStore), with failed-first ordering,
//!   edit exclusion, and backoff retries
//! - [`NetworkMonitor`]: effective online/offline state with drop-scoped
//!   subscriptions and an optional TCP probe
//! - [`PromptSender`]: the injected send function, plus [`HttpPromptSender`]
//!   for the chat endpoint
//! - [`HistorySync`]: best-effort prompt-history exchange with the backend
//! - [`App`]: composer and queue-panel state, with no terminal dependencies
//!
//! The TUI layer (`promptq_tui`) reads state from `App` and forwards input
//! back to it.

pub mod app;
pub mod network;
pub mod queue;
pub mod retry;
pub mod sender;
pub mod sync;

pub use app::{
    App, ComposeMode, ComposeModeAccess, EditMode, EditModeAccess, QueueFocus, QueueFocusAccess,
};
pub use network::{NetworkMonitor, ProbeGuard, ProbeTarget, Subscription};
pub use queue::{
    ContentUpdate, HistoryEditor, QueueManager, QueueOptions, QueueSnapshot, Removal, now_millis,
};
pub use retry::RetryPolicy;
pub use sender::{BackendError, HttpPromptSender, OutboundPrompt, PromptSender, SendError};
pub use sync::{HistorySync, SyncEntry, SyncError, SyncGuard, SyncReport};

pub use promptq_types::ui::{ComposerMode, UiOptions};
pub use promptq_types::{EntryId, EntryStatus, QueueEntry};
