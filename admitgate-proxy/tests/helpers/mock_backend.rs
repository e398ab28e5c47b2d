//! Mock backend API and misbehaving upstreams.

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct MockBackendState {
    pub hits: AtomicU32,
    /// Releases the second event of `/v1/stream`.
    pub release_stream: Notify,
    /// Set once the `/v1/endless` stream has been dropped.
    pub endless_dropped: AtomicBool,
}

/// Flags the backend state when the stream owning it is dropped.
struct DropFlag(Arc<MockBackendState>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.endless_dropped.store(true, Ordering::SeqCst);
    }
}

/// Echoing backend bound to an ephemeral port.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<MockBackendState>,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockBackendState::default());
        let app = Router::new()
            .route("/v1/teapot", get(teapot))
            .route("/v1/stream", get(stream_events))
            .route("/v1/endless", get(endless_events))
            .route("/v1/upload", post(upload))
            .fallback(echo)
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

    pub fn hits(&self) -> u32 {
        self.state.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Returns what the backend saw: method, path, raw query and headers.
async fn echo(
    State(state): State<Arc<MockBackendState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Json<Value> {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        seen.entry(name.to_string())
            .or_default()
            .push(value.to_str().unwrap_or("<binary>").to_string());
    }

    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": seen,
    }))
}

async fn teapot(State(state): State<Arc<MockBackendState>>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::IM_A_TEAPOT,
        [(header::CONTENT_TYPE, "text/plain")],
        "short and stout",
    )
        .into_response()
}

/// Sends one event immediately and a second only once released.
async fn stream_events(State(state): State<Arc<MockBackendState>>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let stream = futures_util::stream::unfold(0u8, move |step| {
        let state = state.clone();
        async move {
            match step {
                0 => Some((Ok::<_, Infallible>(Bytes::from_static(b"data: first\n\n")), 1)),
                1 => {
                    state.release_stream.notified().await;
                    Some((Ok(Bytes::from_static(b"data: second\n\n")), 2))
                }
                _ => None,
            }
        }
    });

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Sends one event and then never finishes.
async fn endless_events(State(state): State<Arc<MockBackendState>>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let flag = DropFlag(state);
    let stream = futures_util::stream::unfold((flag, false), |(flag, sent)| async move {
        if sent {
            std::future::pending::<()>().await;
        }
        Some((
            Ok::<_, Infallible>(Bytes::from_static(b"data: tick\n\n")),
            (flag, true),
        ))
    });

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn upload(State(state): State<Arc<MockBackendState>>, body: Bytes) -> Json<Value> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "received": body.len() }))
}

/// An address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Upstream that reads the request head and then resets the connection.
pub async fn start_reset_upstream() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 4096];
            let _ = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf)).await;

            // SO_LINGER 0 turns close into RST.
            let _ = socket2::SockRef::from(&stream).set_linger(Some(Duration::ZERO));
            drop(stream);
        }
    });

    (addr, handle)
}

/// Plain hyper HTTP/1 upstream that counts accepted TCP connections.
pub async fn start_counting_upstream() -> (SocketAddr, Arc<AtomicU32>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicU32::new(0));

    let counter = accepts.clone();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);

            tokio::spawn(async move {
                let service = hyper::service::service_fn(
                    |_req: hyper::Request<hyper::body::Incoming>| async {
                        Ok::<_, Infallible>(hyper::Response::new(
                            http_body_util::Full::new(Bytes::from_static(b"ok")),
                        ))
                    },
                );
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(hyper_util::rt::TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, accepts, handle)
}
