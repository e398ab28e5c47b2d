//! In-process gateway bound to an ephemeral port.

use admitgate_core::AdmissionController;
use admitgate_proxy::logging_layer::logging_layer;
use admitgate_proxy::proxy_config::ProxyConfig;
use admitgate_proxy::proxy_service::{GatewayService, Upstream, UpstreamPools};
use admitgate_proxy::server::serve;
use admitgate_proxy::session::{ForwardedAuthResolver, SessionResolver};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;

pub const ACCESS_TOKEN: &str = "user-access-token";

pub struct TestGateway {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TestGateway {
    /// Forwarded-auth gateway without admission gating.
    pub async fn start(upstream_url: &str) -> Self {
        Self::start_with(
            upstream_url,
            Arc::new(ForwardedAuthResolver),
            AdmissionController::disabled(),
        )
        .await
    }

    pub async fn start_with(
        upstream_url: &str,
        resolver: Arc<dyn SessionResolver>,
        admission: AdmissionController,
    ) -> Self {
        let config = ProxyConfig::default();
        let shutdown = CancellationToken::new();

        let pools = Arc::new(UpstreamPools::new(&config).unwrap());
        let gateway = GatewayService::new(
            Upstream::parse(upstream_url).unwrap(),
            pools,
            resolver,
            config.clone(),
        )
        .with_admission(admission)
        .with_shutdown(shutdown.clone());

        let service = ServiceBuilder::new().layer(logging_layer()).service(gateway);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, service, config, shutdown.clone()));

        Self { addr, shutdown }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Request builder carrying the edge-forwarded session headers.
pub fn authed(
    client: &reqwest::Client,
    method: reqwest::Method,
    url: &str,
    email: Option<&str>,
) -> reqwest::RequestBuilder {
    let mut builder = client
        .request(method, url)
        .header("x-forwarded-access-token", ACCESS_TOKEN);
    if let Some(email) = email {
        builder = builder.header("x-forwarded-email", email);
    }
    builder
}
