//! Accept loop and per-connection serving.
//!
//! Each accepted connection is served on its own task with
//! `hyper_util::server::conn::auto` (HTTP/1 and HTTP/2). A semaphore caps
//! concurrent connections; excess connections get a raw 503 and are closed.

use crate::error::ProxyError;
use crate::proxy_body::BoxError;
use crate::proxy_config::ProxyConfig;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, error, info, warn};

/// How long in-flight connections get to finish after shutdown is signalled.
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve `service` on `listener` until `shutdown` fires.
///
/// Returns once the listener is closed; connection tasks already spawned
/// drain on their own.
pub async fn serve<S, B>(
    listener: TcpListener,
    service: S,
    config: ProxyConfig,
    shutdown: CancellationToken,
) where
    S: Service<Request<Incoming>, Response = Response<B>, Error = ProxyError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_connections));

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        warn!(
                            peer = %peer_addr,
                            max_connections = config.max_concurrent_connections,
                            "Rejected connection: max concurrent connections reached"
                        );
                        tokio::spawn(async move {
                            let _ = send_503_response(stream).await;
                        });
                        continue;
                    }
                };

                if let Err(e) = configure_tcp_stream(&stream, &config) {
                    error!(error = %e, "Failed to configure socket");
                }

                let service = service.clone();
                let conn_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, service, conn_shutdown).await;
                    drop(permit);
                });
            }
            _ = shutdown.cancelled() => {
                info!("Shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }
}

/// Serve a single connection, converting service errors into responses.
pub async fn handle_connection<S, B>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    service: S,
    shutdown: CancellationToken,
) where
    S: Service<Request<Incoming>, Response = Response<B>, Error = ProxyError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    debug!(peer = %peer_addr, "Connection accepted");
    let io = TokioIo::new(stream);

    let svc_fn = hyper::service::service_fn(move |req| {
        let mut svc = service.clone();
        async move {
            let result: Result<_, std::convert::Infallible> = match svc.call(req).await {
                Ok(response) => Ok(response.map(|body| {
                    body.map_err(|e| -> BoxError { e.into() }).boxed_unsync()
                })),
                Err(e) => {
                    if e.status().is_server_error() {
                        error!(error = %e, kind = %e.kind(), "Request failed");
                    } else {
                        warn!(error = %e, kind = %e.kind(), "Request rejected");
                    }
                    Ok(e
                        .to_response()
                        .map(|body| body.map_err(|never| match never {}).boxed_unsync()))
                }
            };
            result
        }
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(io, svc_fn);
    tokio::pin!(conn);

    tokio::select! {
        result = &mut conn => {
            if let Err(e) = result {
                debug!(peer = %peer_addr, error = %e, "Connection closed with error");
            }
        }
        _ = shutdown.cancelled() => {
            debug!(peer = %peer_addr, "Gracefully closing connection");
            conn.as_mut().graceful_shutdown();
            let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, conn).await;
        }
    }
}

/// Apply TCP_NODELAY and keepalive to an accepted socket.
pub fn configure_tcp_stream(stream: &TcpStream, config: &ProxyConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    let socket = socket2::SockRef::from(stream);
    let keepalive =
        socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.tcp_keepalive_secs));
    socket.set_tcp_keepalive(&keepalive)?;

    Ok(())
}

/// Raw 503 for connections over the concurrency cap.
async fn send_503_response(mut stream: TcpStream) -> std::io::Result<()> {
    let body = r#"{"kind":"service_unavailable","message":"Too many concurrent connections."}"#;
    let response = format!(
        "HTTP/1.1 503 Service Unavailable\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Retry-After: 1\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
