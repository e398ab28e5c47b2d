//! Integration tests for the REST key-value store client and the
//! admission controller running on top of it.

mod helpers;

use admitgate_core::admission::{
    AdmissionController, AdmissionGrant, AdmissionStore, KvRestConfig, KvRestStore, StoreError,
    WAITLIST_KEY,
};
use admitgate_core::{AdmissionError, ErrorKind};
use helpers::{MOCK_TOKEN, MockKvServer};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn store_for(server: &MockKvServer, token: &str) -> KvRestStore {
    KvRestStore::new(KvRestConfig::new(server.url(), token)).expect("valid config")
}

#[tokio::test]
async fn test_get_returns_value_or_none() {
    let server = MockKvServer::start().await;
    server.state.set("user:a@example.com", "admitted").await;
    let store = store_for(&server, MOCK_TOKEN);

    assert_eq!(
        store.get("user:a@example.com").await.unwrap().as_deref(),
        Some("admitted")
    );
    assert_eq!(store.get("user:missing@example.com").await.unwrap(), None);
}

#[tokio::test]
async fn test_list_tail_and_append() {
    let server = MockKvServer::start().await;
    let store = store_for(&server, MOCK_TOKEN);

    assert_eq!(store.list_tail(WAITLIST_KEY).await.unwrap(), None);
    assert_eq!(store.list_append(WAITLIST_KEY, "a@example.com").await.unwrap(), 1);
    assert_eq!(store.list_append(WAITLIST_KEY, "b@example.com").await.unwrap(), 2);
    assert_eq!(
        store.list_tail(WAITLIST_KEY).await.unwrap().as_deref(),
        Some("b@example.com")
    );

    let commands = server.state.commands.read().await.clone();
    assert_eq!(commands[0], vec!["LINDEX", WAITLIST_KEY, "-1"]);
    assert_eq!(commands[1], vec!["RPUSH", WAITLIST_KEY, "a@example.com"]);
}

#[tokio::test]
async fn test_bad_token_is_rejected_command() {
    let server = MockKvServer::start().await;
    let store = store_for(&server, "wrong-token");

    let err = store.get("user:a@example.com").await.unwrap_err();
    assert!(matches!(err, StoreError::Rejected(_)), "got {err:?}");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_server_error_is_unreachable() {
    let server = MockKvServer::start().await;
    server.state.fail_with_500.store(true, Ordering::Relaxed);
    let store = store_for(&server, MOCK_TOKEN);

    let err = store.get("user:a@example.com").await.unwrap_err();
    assert!(matches!(err, StoreError::Unreachable(_)), "got {err:?}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_connection_refused_is_unreachable() {
    // Bind then drop to obtain a port with nothing listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = KvRestStore::new(
        KvRestConfig::new(format!("http://{addr}"), MOCK_TOKEN)
            .with_timeout(Duration::from_secs(1)),
    )
    .unwrap();

    let err = store.get("user:a@example.com").await.unwrap_err();
    assert!(matches!(err, StoreError::Unreachable(_)), "got {err:?}");
}

#[tokio::test]
async fn test_controller_admits_over_rest_store() {
    let server = MockKvServer::start().await;
    server.state.set("user:alice@example.com", "admitted").await;
    let controller =
        AdmissionController::new(Some(Arc::new(store_for(&server, MOCK_TOKEN))));

    let grant = controller
        .authorize("Alice@Example.com", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(grant, AdmissionGrant::Recorded);
    assert_eq!(server.state.request_count.load(Ordering::Relaxed), 1);
    assert!(server.state.list(WAITLIST_KEY).await.is_empty());
}

#[tokio::test]
async fn test_controller_enqueues_then_observes_decision() {
    let server = MockKvServer::start().await;
    let controller =
        AdmissionController::new(Some(Arc::new(store_for(&server, MOCK_TOKEN))));

    let worker_state = server.state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        worker_state.set("user:bob@example.com", "rejected").await;
    });

    let err = controller
        .authorize("bob@example.com", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AdmissionError::Unauthorized { .. }));
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(
        server.state.list(WAITLIST_KEY).await,
        vec!["bob@example.com".to_string()]
    );
}

#[tokio::test]
async fn test_controller_surfaces_store_outage() {
    let server = MockKvServer::start().await;
    server.state.fail_with_500.store(true, Ordering::Relaxed);
    let controller =
        AdmissionController::new(Some(Arc::new(store_for(&server, MOCK_TOKEN))));

    let err = controller
        .authorize("carol@example.com", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AdmissionError::Store(_)));
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
}
