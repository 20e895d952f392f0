//! Session persistence across restarts

use std::fs;

use promptq_engine::{EntryStatus, NetworkMonitor, OutboundPrompt, QueueManager, SendError};
use promptq_store::{DraftStore, session_file_name};
use promptq_types::{EntryId, NonEmptyString, QueueEntry, UnixMillis};
use tempfile::TempDir;
use wiremock::MockServer;

use crate::common::{delivered_prompts, fast_options, http_queue, mount_chat_ok, wait_until};

const SESSION: &str = "review";

fn open(dir: &TempDir) -> DraftStore {
    DraftStore::open(dir.path(), SESSION, 100)
}

fn entry(id: &str, content: &str) -> QueueEntry {
    QueueEntry::new(
        EntryId::new(id),
        NonEmptyString::new(content).unwrap(),
        UnixMillis(1_700_000_000_000),
    )
}

#[test]
fn interrupted_send_is_requeued_on_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = open(&dir);
        assert!(store.is_persistent());
        store.push_queued(entry("mid-flight", "was sending"));
        store.push_queued(entry("waiting", "still pending"));
        assert!(store.update_queued(&EntryId::new("mid-flight"), |e| {
            e.status = EntryStatus::Sending;
            e.attempts = 1;
        }));
    }

    let store = open(&dir);
    let statuses: Vec<_> = store
        .queue()
        .iter()
        .map(|e| (e.id.as_str(), e.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("mid-flight", EntryStatus::Pending),
            ("waiting", EntryStatus::Pending)
        ]
    );
}

#[tokio::test]
async fn restart_delivers_prompts_left_in_queue() {
    let dir = TempDir::new().unwrap();
    {
        let sender = |_p: OutboundPrompt| std::future::ready(Ok::<(), SendError>(()));
        let queue = QueueManager::start(
            open(&dir),
            sender,
            NetworkMonitor::new(false),
            fast_options(),
        );
        queue.enqueue("survives restart");
        assert_eq!(queue.snapshot().queue.len(), 1);
    }

    let server = MockServer::start().await;
    mount_chat_ok(&server).await;
    let queue = http_queue(&server, open(&dir), NetworkMonitor::new(true));

    let snapshot = wait_until(&queue, |s| s.queue.is_empty()).await;
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(delivered_prompts(&server).await, vec!["survives restart"]);

    let reopened = open(&dir);
    assert!(reopened.queue().is_empty());
    assert_eq!(reopened.sent()[0].content, "survives restart");
}

#[tokio::test]
async fn draft_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let sender = |_p: OutboundPrompt| std::future::ready(Ok::<(), SendError>(()));
        let queue = QueueManager::start(
            open(&dir),
            sender,
            NetworkMonitor::new(true),
            fast_options(),
        );
        queue.set_draft("half a thought");
    }

    assert_eq!(open(&dir).draft(), "half a thought");
}

#[test]
fn unreadable_session_is_set_aside() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(session_file_name(SESSION));
    fs::write(&path, "{ not json").unwrap();

    let store = open(&dir);
    assert!(store.queue().is_empty());
    assert_eq!(store.draft(), "");

    let aside = dir.path().join(format!("{}.corrupt", session_file_name(SESSION)));
    assert_eq!(fs::read_to_string(aside).unwrap(), "{ not json");
}
