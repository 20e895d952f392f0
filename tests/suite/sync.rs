//! Prompt-history sync against a mock backend

use std::time::Duration;

use promptq_engine::{HistorySync, NetworkMonitor, RetryPolicy};
use promptq_store::DraftStore;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{SYNC_PATH, http_queue, mount_chat_ok, wait_until};

fn history_sync(server: &MockServer) -> HistorySync {
    HistorySync::new(
        &server.uri(),
        Some("test-key".into()),
        None,
        "spt_1",
        Duration::from_secs(5),
    )
    .unwrap()
    .with_retry(RetryPolicy::immediate())
}

async fn sync_bodies(server: &MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == SYNC_PATH)
        .filter_map(|request| serde_json::from_slice(&request.body).ok())
        .collect()
}

#[tokio::test]
async fn delivered_prompts_are_uploaded_and_remote_history_merged() {
    let server = MockServer::start().await;
    mount_chat_ok(&server).await;
    Mock::given(method("POST"))
        .and(path(SYNC_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "synced": 1,
            "existing": 0,
            "entries": [
                {"id": "web-1", "content": "typed in the browser", "status": "sent", "timestamp": 1},
            ]
        })))
        .mount(&server)
        .await;

    let queue = http_queue(&server, DraftStore::in_memory(100), NetworkMonitor::new(true));
    let _sync = history_sync(&server).spawn(queue.clone(), Duration::from_millis(10));

    queue.enqueue("typed in the terminal");
    let snapshot = wait_until(&queue, |s| {
        s.history
            .iter()
            .any(|e| e.content == "typed in the browser")
    })
    .await;
    assert!(
        snapshot
            .history
            .iter()
            .any(|e| e.content == "typed in the terminal")
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let uploaded = sync_bodies(&server).await.iter().any(|body| {
                body["spec_task_id"] == "spt_1"
                    && body["entries"]
                        .as_array()
                        .is_some_and(|entries| {
                            entries
                                .iter()
                                .any(|e| e["content"] == "typed in the terminal")
                        })
            });
            if uploaded {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("delivered prompt should be uploaded");
}

#[tokio::test]
async fn sync_outage_leaves_queue_untouched() {
    let server = MockServer::start().await;
    mount_chat_ok(&server).await;
    Mock::given(method("POST"))
        .and(path(SYNC_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let queue = http_queue(&server, DraftStore::in_memory(100), NetworkMonitor::new(true));
    let _sync = history_sync(&server).spawn(queue.clone(), Duration::from_millis(10));

    queue.enqueue("still delivered");
    let snapshot = wait_until(&queue, |s| s.history.len() == 1).await;
    assert_eq!(snapshot.history[0].content, "still delivered");
    assert!(snapshot.queue.is_empty());
}
