//! Mock REST key-value server speaking the Upstash command dialect.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub const MOCK_TOKEN: &str = "test-kv-token";

#[derive(Debug, Default)]
pub struct MockKvState {
    pub strings: RwLock<HashMap<String, String>>,
    pub lists: RwLock<HashMap<String, Vec<String>>>,
    pub commands: RwLock<Vec<Vec<String>>>,
    pub request_count: AtomicU32,
    pub fail_with_500: AtomicBool,
}

impl MockKvState {
    pub async fn set(&self, key: &str, value: &str) {
        self.strings
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }

    pub async fn list(&self, key: &str) -> Vec<String> {
        self.lists.read().await.get(key).cloned().unwrap_or_default()
    }
}

/// Running mock server.
pub struct MockKvServer {
    pub addr: SocketAddr,
    pub state: Arc<MockKvState>,
    handle: JoinHandle<()>,
}

impl MockKvServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockKvState::default());
        let app = Router::new()
            .route("/", post(command))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for MockKvServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn command(
    State(state): State<Arc<MockKvState>>,
    headers: HeaderMap,
    Json(args): Json<Vec<String>>,
) -> (StatusCode, Json<Value>) {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    state.commands.write().await.push(args.clone());

    if state.fail_with_500.load(Ordering::Relaxed) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "internal"})),
        );
    }

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {MOCK_TOKEN}"));
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        );
    }

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["GET", key] => {
            let value = state.strings.read().await.get(*key).cloned();
            (StatusCode::OK, Json(json!({ "result": value })))
        }
        ["LINDEX", key, "-1"] => {
            let tail = state
                .lists
                .read()
                .await
                .get(*key)
                .and_then(|l| l.last().cloned());
            (StatusCode::OK, Json(json!({ "result": tail })))
        }
        ["RPUSH", key, value] => {
            let mut lists = state.lists.write().await;
            let list = lists.entry(key.to_string()).or_default();
            list.push(value.to_string());
            (StatusCode::OK, Json(json!({ "result": list.len() })))
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "ERR unknown command"})),
        ),
    }
}
