//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use promptq_engine::{
    HttpPromptSender, NetworkMonitor, QueueManager, QueueOptions, QueueSnapshot, RetryPolicy,
};
use promptq_store::DraftStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CHAT_PATH: &str = "/api/v1/sessions/chat";
pub const SYNC_PATH: &str = "/api/v1/prompt-history/sync";

/// Mount a chat endpoint that accepts every prompt.
pub async fn mount_chat_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(server)
        .await;
}

pub fn sender_for(server: &MockServer) -> HttpPromptSender {
    HttpPromptSender::new(
        &server.uri(),
        Some("test-key".into()),
        Some("ses_test".into()),
        Duration::from_secs(5),
    )
    .expect("mock server uri is valid")
}

pub fn fast_options() -> QueueOptions {
    QueueOptions {
        dispatch_delay: Duration::from_millis(1),
        retry: RetryPolicy::immediate(),
        ..QueueOptions::default()
    }
}

/// Queue wired to `server` through the real HTTP sender.
pub fn http_queue(
    server: &MockServer,
    store: DraftStore,
    network: NetworkMonitor,
) -> QueueManager {
    QueueManager::start(store, sender_for(server), network, fast_options())
}

/// Poll `queue` until `done` holds, failing the test after a few seconds.
pub async fn wait_until(
    queue: &QueueManager,
    done: impl Fn(&QueueSnapshot) -> bool,
) -> QueueSnapshot {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = queue.snapshot();
            if done(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue did not reach the expected state")
}

/// Prompt texts received by the chat endpoint, in arrival order.
pub async fn delivered_prompts(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == CHAT_PATH)
        .filter_map(|request| serde_json::from_slice::<serde_json::Value>(&request.body).ok())
        .filter_map(|body| {
            body["messages"][0]["content"]["parts"][0]
                .as_str()
                .map(str::to_owned)
        })
        .collect()
}
