//! Core gateway service.
//!
//! # Request Flow
//!
//! ```text
//! Request<Incoming>
//!     │
//!     ├─► SessionResolver::resolve()        no session  → 401 auth_error
//!     ├─► ProxyRequestContext::build()      bad path    → 404 not_found
//!     ├─► AdmissionController::authorize()  (if gated)  → 400 / 403 / 503
//!     ├─► header + query rewrite
//!     └─► UpstreamPools::request()          refused     → 503
//!                                           reset       → 504
//!                                           other       → 500
//!                                           response    → streamed verbatim
//! ```
//!
//! Transport failures are classified before a response head exists, so a
//! client never sees a partial success followed by an error.

use crate::error::{ProxyError, ProxyResult};
use crate::proxy_body::{BoxError, ProxyBody};
use crate::proxy_config::ProxyConfig;
use crate::routing::ProxyRequestContext;
use crate::session::{FORWARDED_ACCESS_TOKEN_HEADER, FORWARDED_EMAIL_HEADER, SessionResolver};
use admitgate_core::AdmissionController;
use bytes::Bytes;
use http::uri::{Authority, Scheme};
use http::{HeaderMap, HeaderName, Uri, header};
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use std::io;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, info, warn};

/// Streaming body sent to the upstream.
pub type ClientBody = UnsyncBoxBody<Bytes, BoxError>;

/// Streaming body returned to the client.
pub type GatewayBody = UnsyncBoxBody<Bytes, BoxError>;

type PlainClient = Client<HttpConnector, ClientBody>;
type TlsClient = Client<HttpsConnector<HttpConnector>, ClientBody>;

/// Fixed upstream origin, optionally with a base path.
#[derive(Debug, Clone)]
pub struct Upstream {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
}

impl Upstream {
    /// Parse an `http://` or `https://` origin such as `https://api.example.com/base`.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Internal` for anything that is not an absolute
    /// http(s) URL.
    pub fn parse(url: &str) -> ProxyResult<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| ProxyError::Internal(format!("Invalid upstream URL {url}: {e}")))?;

        let scheme = match uri.scheme() {
            Some(s) if *s == Scheme::HTTP || *s == Scheme::HTTPS => s.clone(),
            _ => {
                return Err(ProxyError::Internal(format!(
                    "Upstream URL must use http or https: {url}"
                )));
            }
        };
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| ProxyError::Internal(format!("Upstream URL has no host: {url}")))?;

        Ok(Self {
            scheme,
            authority,
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    /// Absolute upstream URI for a rewritten path and query.
    pub fn uri_for(&self, path_and_query: &str) -> ProxyResult<Uri> {
        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(format!("{}{}", self.base_path, path_and_query))
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to build upstream URI: {e}")))
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.base_path)
    }
}

/// Long-lived keep-alive pools, one per scheme, shared by every request.
pub struct UpstreamPools {
    plain: PlainClient,
    tls: TlsClient,
}

impl UpstreamPools {
    /// Build both pools from `config`.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Internal` if no rustls crypto provider can be
    /// installed.
    pub fn new(config: &ProxyConfig) -> ProxyResult<Self> {
        install_crypto_provider()?;

        let mut plain_connector = HttpConnector::new();
        plain_connector.set_nodelay(config.tcp_nodelay);
        plain_connector.set_connect_timeout(Some(config.connect_timeout));

        let mut tls_inner = plain_connector.clone();
        tls_inner.enforce_http(false);

        let tls_builder = match HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                warn!(error = %e, "No native TLS roots available, using bundled webpki roots");
                HttpsConnectorBuilder::new().with_webpki_roots()
            }
        };
        let tls_connector = tls_builder
            .https_only()
            .enable_http1()
            .enable_http2()
            .wrap_connector(tls_inner);

        let plain = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build(plain_connector);

        let tls = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build(tls_connector);

        Ok(Self { plain, tls })
    }

    /// Send `req` on the pool matching its URI scheme.
    pub async fn request(
        &self,
        req: Request<ClientBody>,
    ) -> Result<Response<Incoming>, hyper_util::client::legacy::Error> {
        if req.uri().scheme() == Some(&Scheme::HTTPS) {
            self.tls.request(req).await
        } else {
            self.plain.request(req).await
        }
    }
}

/// Install the ring provider once per process. A provider installed by
/// someone else is accepted.
fn install_crypto_provider() -> ProxyResult<()> {
    static RUSTLS_INIT: OnceLock<()> = OnceLock::new();
    RUSTLS_INIT.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });

    if rustls::crypto::CryptoProvider::get_default().is_none() {
        return Err(ProxyError::Internal(
            "Failed to install rustls crypto provider".into(),
        ));
    }
    Ok(())
}

/// The gateway. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct GatewayService {
    upstream: Arc<Upstream>,
    pools: Arc<UpstreamPools>,
    resolver: Arc<dyn SessionResolver>,
    admission: AdmissionController,
    config: Arc<ProxyConfig>,
    shutdown: CancellationToken,
}

impl GatewayService {
    /// Gateway with admission gating disabled.
    pub fn new(
        upstream: Upstream,
        pools: Arc<UpstreamPools>,
        resolver: Arc<dyn SessionResolver>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            upstream: Arc::new(upstream),
            pools,
            resolver,
            admission: AdmissionController::disabled(),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    /// Gate every forwarded request through `admission`.
    pub fn with_admission(mut self, admission: AdmissionController) -> Self {
        self.admission = admission;
        self
    }

    /// Per-request tokens become children of `shutdown`.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Handle one inbound request end to end.
    pub async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> ProxyResult<Response<GatewayBody>> {
        // Dropping this future (client gone) or the response body cancels
        // the request token.
        let request_token = self.shutdown.child_token();
        let guard = request_token.clone().drop_guard();

        let session = self
            .resolver
            .resolve(req.headers())
            .await
            .ok_or(ProxyError::AuthError)?;

        let ctx = ProxyRequestContext::build(
            req.uri(),
            req.headers(),
            &session.access_token,
            &self.config.mount_prefix,
        )?;

        if self.admission.is_enabled() {
            let identity = session.email.as_deref().unwrap_or_default();
            let grant = self.admission.authorize(identity, &request_token).await?;
            debug!(grant = ?grant, "Admission granted");
        }

        let target = self.upstream.uri_for(&ctx.path_and_query)?;
        let (parts, incoming) = req.into_parts();

        info!(
            method = %parts.method,
            path = %target.path(),
            upstream = %self.upstream,
            "Proxying request"
        );

        let body = ProxyBody::new(incoming, request_token.clone(), "request").boxed_unsync();

        let mut upstream_req = Request::new(body);
        *upstream_req.method_mut() = parts.method;
        *upstream_req.uri_mut() = target;
        *upstream_req.headers_mut() = forwarded_request_headers(parts.headers, ctx.headers);

        let upstream_res = self
            .pools
            .request(upstream_req)
            .await
            .map_err(|e| classify_upstream_error(&e))?;

        let (mut parts, body) = upstream_res.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        debug!(status = %parts.status, "Upstream responded, streaming body");

        let body = ProxyBody::new(body, request_token, "response")
            .with_drop_guard(guard)
            .boxed_unsync();

        Ok(Response::from_parts(parts, body))
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<GatewayBody>;
    type Error = ProxyError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { service.handle_request(req).await })
    }
}

/// RFC 9110 §7.6.1 connection-specific headers.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Inbound headers the gateway always replaces or drops.
const REPLACED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "authorization",
    "cookie",
    FORWARDED_ACCESS_TOKEN_HEADER,
    FORWARDED_EMAIL_HEADER,
    "x-correlation-id",
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Inbound headers minus hop-by-hop and replaced ones, plus `injected`.
///
/// Multi-valued headers keep every value.
pub fn forwarded_request_headers(mut inbound: HeaderMap, injected: HeaderMap) -> HeaderMap {
    strip_hop_by_hop(&mut inbound);
    for name in REPLACED_REQUEST_HEADERS {
        inbound.remove(*name);
    }

    let mut current: Option<HeaderName> = None;
    for (name, value) in injected {
        if let Some(name) = name {
            inbound.remove(&name);
            current = Some(name);
        }
        if let Some(name) = &current {
            inbound.append(name.clone(), value);
        }
    }
    inbound
}

/// Map an upstream transport failure onto the gateway taxonomy.
///
/// Walks the source chain for an `io::Error` or a hyper incomplete-message
/// error, falling back to message inspection.
pub fn classify_upstream_error(err: &(dyn StdError + 'static)) -> ProxyError {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);

    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => {
                    warn!(error = %err, "Upstream refused connection");
                    return ProxyError::ConnectionRefused(err.to_string());
                }
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => {
                    warn!(error = %err, "Upstream connection reset");
                    return ProxyError::ConnectionReset(err.to_string());
                }
                _ => {}
            }
        }
        if let Some(hyper_err) = e.downcast_ref::<hyper::Error>()
            && hyper_err.is_incomplete_message()
        {
            warn!(error = %err, "Upstream closed connection mid-exchange");
            return ProxyError::ConnectionReset(err.to_string());
        }
        source = e.source();
    }

    let message = chain_to_string(err).to_lowercase();
    if message.contains("connection refused") {
        warn!(error = %err, "Upstream refused connection");
        return ProxyError::ConnectionRefused(err.to_string());
    }
    if message.contains("connection reset") {
        warn!(error = %err, "Upstream connection reset");
        return ProxyError::ConnectionReset(err.to_string());
    }

    warn!(error = %err, "Upstream error");
    ProxyError::Internal(format!("Upstream error: {err}"))
}

fn chain_to_string(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}
