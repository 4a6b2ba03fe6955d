//! End-to-end tests of the sync engine against an HTTP backend.
//!
//! Run with: `cargo test -p larder-core --features http-remote`

#![cfg(feature = "http-remote")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use larder_core::{HttpRemote, SyncEngine, SyncOptions};
use larder_store::Store;
use larder_types::{OperationKind, OperationStatus};

fn engine(server: &MockServer, store: Store, online: bool) -> SyncEngine {
    let remote = Arc::new(HttpRemote::new(&server.uri(), Duration::from_secs(5)).unwrap());
    SyncEngine::new(
        store,
        remote.clone(),
        remote,
        SyncOptions::default().start_online(online),
    )
    .unwrap()
}

#[tokio::test]
async fn test_queued_writes_replay_after_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/products"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/products"))
        .and(query_param("id", "eq.p1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("queue.db");

    {
        let offline = engine(&server, Store::open(&db).unwrap(), false);
        for payload in [json!({"id": "p1", "name": "Flour"}), json!({"name": "Sugar"})] {
            offline
                .queue_operation(OperationKind::Create, "products", payload)
                .await
                .unwrap();
        }
        offline
            .queue_operation(OperationKind::Update, "products", json!({"id": "p1", "price": "1.10"}))
            .await
            .unwrap();
        assert_eq!(offline.status().pending_operations, 3);
        offline.dispose().await;
    }

    let online = engine(&server, Store::open(&db).unwrap(), true);
    assert_eq!(online.status().pending_operations, 3);

    let report = online.force_sync().await.unwrap();
    assert_eq!(report.synced, 3);
    assert_eq!(online.status().pending_operations, 0);
}

#[tokio::test]
async fn test_rejected_write_is_dead_lettered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/products"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"message": "price must be positive"})),
        )
        .mount(&server)
        .await;

    let engine = engine(&server, Store::open_in_memory().unwrap(), true);
    engine
        .queue_operation(OperationKind::Create, "products", json!({"price": "-1"}))
        .await
        .unwrap();

    let report = engine.force_sync().await.unwrap();
    assert_eq!(report.dead_lettered, 1);

    let failed = engine.failed_operations().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, OperationStatus::Failed);
    assert!(
        failed[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("price must be positive")
    );
}

#[tokio::test]
async fn test_server_error_is_retried_later() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/products"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let engine = engine(&server, Store::open_in_memory().unwrap(), true);
    engine
        .queue_operation(OperationKind::Delete, "products", json!({"id": "p9"}))
        .await
        .unwrap();

    let report = engine.force_sync().await.unwrap();
    assert_eq!(report.retried, 1);

    let pending = engine.pending_operations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].next_attempt_at.is_some());
}
