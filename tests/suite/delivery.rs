//! End-to-end delivery through the HTTP sender

use std::time::Duration;

use promptq_engine::{EntryStatus, NetworkMonitor, QueueManager, QueueOptions, RetryPolicy};
use promptq_store::DraftStore;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    CHAT_PATH, delivered_prompts, fast_options, http_queue, mount_chat_ok, sender_for, wait_until,
};

#[tokio::test]
async fn offline_prompts_deliver_in_order_once_online() {
    let server = MockServer::start().await;
    mount_chat_ok(&server).await;

    let network = NetworkMonitor::new(false);
    let queue = http_queue(&server, DraftStore::in_memory(100), network.clone());
    for prompt in ["first", "second", "third"] {
        assert!(queue.enqueue(prompt).is_some());
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(delivered_prompts(&server).await.is_empty());
    assert_eq!(queue.snapshot().queue.len(), 3);

    network.set_online(true);
    let snapshot = wait_until(&queue, |s| s.queue.is_empty()).await;

    assert_eq!(snapshot.history.len(), 3);
    assert_eq!(
        delivered_prompts(&server).await,
        vec!["first", "second", "third"]
    );
}

#[tokio::test]
async fn chat_request_carries_session_and_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "session_id": "ses_test",
            "stream": false,
            "messages": [{"role": "user", "content": {"content_type": "text", "parts": ["ping"]}}],
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue = http_queue(&server, DraftStore::in_memory(100), NetworkMonitor::new(true));
    queue.enqueue("ping");
    wait_until(&queue, |s| s.history.len() == 1).await;
}

#[tokio::test]
async fn transient_failure_is_retried_until_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_chat_ok(&server).await;

    let queue = http_queue(&server, DraftStore::in_memory(100), NetworkMonitor::new(true));
    queue.enqueue("flaky");

    let snapshot = wait_until(&queue, |s| s.history.len() == 1).await;
    assert!(snapshot.queue.is_empty());
    assert_eq!(snapshot.history[0].status, EntryStatus::Sent);
    assert_eq!(delivered_prompts(&server).await, vec!["flaky", "flaky"]);
}

#[tokio::test]
async fn rejected_prompt_is_retried_automatically() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid session"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_chat_ok(&server).await;

    let queue = http_queue(&server, DraftStore::in_memory(100), NetworkMonitor::new(true));
    let id = queue.enqueue("needs a fix").expect("non-blank prompt");

    let snapshot = wait_until(&queue, |s| s.queue.is_empty()).await;
    assert!(!snapshot.is_parked(&id));
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].attempts, 2);
    assert_eq!(
        delivered_prompts(&server).await,
        vec!["needs a fix", "needs a fix"]
    );
}

#[tokio::test]
async fn failed_prompt_goes_out_before_newer_ones() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_chat_ok(&server).await;

    let network = NetworkMonitor::new(false);
    let options = QueueOptions {
        retry: RetryPolicy {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.0,
            max_attempts: None,
        },
        ..fast_options()
    };
    let queue = QueueManager::start(
        DraftStore::in_memory(100),
        sender_for(&server),
        network.clone(),
        options,
    );
    queue.enqueue("a");
    queue.enqueue("b");
    network.set_online(true);

    let snapshot = wait_until(&queue, |s| s.queue.is_empty()).await;
    // "a" waits out its backoff and still goes ahead of "b".
    assert_eq!(delivered_prompts(&server).await, vec!["a", "a", "b"]);
    let history: Vec<&str> = snapshot.history.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(history, ["a", "b"]);
}
