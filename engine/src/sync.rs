//! Best-effort prompt-history sync with the backend.
//!
//! The backend endpoint is a union merge: entries it has not seen are stored,
//! known ids are left alone, and the response carries the backend's recent
//! history for the same task. Only delivered entries are uploaded, since the
//! backend dispatches newly synced `interrupt` prompts itself and would
//! otherwise race the local queue.
//!
//! Sync failures are logged and never touch the local queue.

use std::collections::HashSet;
use std::time::Duration;

use promptq_types::{EntryId, EntryStatus, NonEmptyString, QueueEntry, UnixMillis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::queue::QueueManager;
use crate::retry::{RetryOutcome, RetryPolicy, send_with_retry};
use crate::sender::{BackendError, endpoint, http_client};

const SYNC_PATH: &str = "api/v1/prompt-history/sync";
const SYNC_MAX_RETRIES: u32 = 2;
const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync request failed after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        source: reqwest::Error,
    },
    #[error("sync rejected with {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid sync response: {0}")]
    Decode(reqwest::Error),
}

/// One history entry as the sync endpoint expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncEntry {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub status: EntryStatus,
    pub interrupt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    pub pinned: bool,
    /// JSON array encoded as a string.
    pub tags: String,
    pub is_template: bool,
    pub timestamp: i64,
}

impl From<&QueueEntry> for SyncEntry {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            session_id: entry.session_id.clone().unwrap_or_default(),
            content: entry.content.clone(),
            status: entry.status,
            interrupt: entry.interrupt,
            queue_position: None,
            pinned: entry.pinned,
            tags: serde_json::to_string(&entry.tags).unwrap_or_else(|_| "[]".to_owned()),
            is_template: entry.is_template,
            timestamp: entry.timestamp.value(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SyncRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    spec_task_id: &'a str,
    entries: Vec<SyncEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncResponse {
    #[serde(default)]
    synced: usize,
    #[serde(default)]
    existing: usize,
    #[serde(default)]
    entries: Vec<RemoteEntry>,
}

/// Backend history row. Every field is optional so that unknown or partial
/// rows are skipped instead of failing the whole response.
#[derive(Debug, Default, Deserialize)]
struct RemoteEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    interrupt: Option<bool>,
    #[serde(default)]
    pinned: Option<bool>,
    #[serde(default)]
    tags: Option<serde_json::Value>,
    #[serde(default)]
    is_template: Option<bool>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    created_at: Option<String>,
}

impl RemoteEntry {
    fn into_entry(self) -> Option<QueueEntry> {
        let id = self.id.filter(|id| !id.trim().is_empty())?;
        let content = NonEmptyString::new(self.content?).ok()?;
        let status = match self.status.as_deref()? {
            "pending" => EntryStatus::Pending,
            "sending" => EntryStatus::Sending,
            "sent" => EntryStatus::Sent,
            "failed" => EntryStatus::Failed,
            _ => return None,
        };
        let timestamp = self
            .timestamp
            .or_else(|| {
                let raw = self.created_at.as_deref()?;
                chrono::DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|t| t.timestamp_millis())
            })
            .unwrap_or_default();

        let mut entry = QueueEntry::new(EntryId::new(id), content, UnixMillis(timestamp))
            .with_session(self.session_id.filter(|s| !s.is_empty()))
            .with_interrupt(self.interrupt.unwrap_or(true));
        entry.status = status;
        entry.pinned = self.pinned.unwrap_or(false);
        entry.is_template = self.is_template.unwrap_or(false);
        entry.tags = self.tags.map(parse_tags).unwrap_or_default();
        Some(entry)
    }
}

/// Tags arrive either as a JSON array or as a string holding one.
fn parse_tags(value: serde_json::Value) -> Vec<String> {
    let array = match value {
        serde_json::Value::String(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        other => other,
    };
    match array {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Result of one sync round.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Entries the backend stored for the first time.
    pub synced: usize,
    /// Entries the backend already had.
    pub existing: usize,
    /// The backend's history, converted. Malformed rows are dropped.
    pub remote: Vec<QueueEntry>,
}

#[derive(Clone)]
pub struct HistorySync {
    client: reqwest::Client,
    url: Url,
    api_key: Option<String>,
    project_id: Option<String>,
    spec_task_id: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for HistorySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistorySync")
            .field("url", &self.url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("project_id", &self.project_id)
            .field("spec_task_id", &self.spec_task_id)
            .finish_non_exhaustive()
    }
}

impl HistorySync {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        project_id: Option<String>,
        spec_task_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: endpoint(base_url, SYNC_PATH)?,
            api_key,
            project_id: project_id.filter(|p| !p.trim().is_empty()),
            spec_task_id: spec_task_id.into(),
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upload `entries` (delivered ones only) and return the backend's view.
    pub async fn sync(&self, entries: &[QueueEntry]) -> Result<SyncReport, SyncError> {
        let body = SyncRequest {
            project_id: self.project_id.as_deref(),
            spec_task_id: &self.spec_task_id,
            entries: entries
                .iter()
                .filter(|e| e.status == EntryStatus::Sent)
                .map(SyncEntry::from)
                .collect(),
        };

        let outcome = send_with_retry(
            || {
                let request = self.client.post(self.url.clone()).json(&body);
                match self.api_key.as_deref() {
                    Some(key) => request.bearer_auth(key),
                    None => request,
                }
            },
            &self.retry,
            SYNC_MAX_RETRIES,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Success(response) => response,
            RetryOutcome::HttpError(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                return Err(SyncError::Rejected {
                    status,
                    body: promptq_types::truncate_with_ellipsis(&text, MAX_ERROR_BODY_CHARS),
                });
            }
            RetryOutcome::ConnectionError { attempts, source } => {
                return Err(SyncError::Connection { attempts, source });
            }
        };

        let parsed: SyncResponse = response.json().await.map_err(SyncError::Decode)?;
        Ok(SyncReport {
            synced: parsed.synced,
            existing: parsed.existing,
            remote: parsed
                .entries
                .into_iter()
                .filter_map(RemoteEntry::into_entry)
                .collect(),
        })
    }

    /// Keep the backend in step with `queue` until the guard is dropped.
    ///
    /// Runs once at start, then after every burst of queue changes settles
    /// for `debounce`. A round is skipped when every delivered entry has
    /// already been exchanged with the backend.
    #[must_use]
    pub fn spawn(self, queue: QueueManager, debounce: Duration) -> SyncGuard {
        let handle = tokio::spawn(async move {
            let mut changes = queue.subscribe();
            let mut known: HashSet<EntryId> = HashSet::new();
            let mut first = true;

            loop {
                if !first {
                    if changes.changed().await.is_err() {
                        break;
                    }
                    tokio::time::sleep(debounce).await;
                }
                changes.borrow_and_update();

                let sent = queue.with_store(|store| store.sent().to_vec());
                let fresh = sent.iter().any(|e| !known.contains(&e.id));
                if !first && !fresh {
                    continue;
                }
                first = false;

                match self.sync(&sent).await {
                    Ok(report) => {
                        known.extend(sent.into_iter().map(|e| e.id));
                        known.extend(report.remote.iter().map(|e| e.id.clone()));
                        let merged = if report.remote.is_empty() {
                            0
                        } else {
                            queue.edit_history(|history| history.merge_remote(report.remote))
                        };
                        info!(
                            synced = report.synced,
                            existing = report.existing,
                            merged,
                            "Prompt history synced"
                        );
                    }
                    Err(e) => warn!(error = %e, "Prompt history sync failed"),
                }
            }
            debug!("History sync stopped");
        });
        SyncGuard { handle }
    }
}

/// Stops the sync task on drop.
#[derive(Debug)]
pub struct SyncGuard {
    handle: JoinHandle<()>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
