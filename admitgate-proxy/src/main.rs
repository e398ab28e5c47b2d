//! admitgate: authenticated reverse-proxy gateway with waitlist admission.
//!
//! Forwards versioned API traffic to a fixed backend origin, injecting the
//! caller's bearer token and promoting control query parameters to headers.
//! When a KV store is configured, every caller must first pass the waitlist
//! admission gate.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use admitgate_core::AdmissionController;
use admitgate_core::admission::{AdmissionStore, InMemoryStore, KvRestConfig, KvRestStore};
use admitgate_proxy::admin::AdminServer;
use admitgate_proxy::logging_layer::logging_layer;
use admitgate_proxy::ports::listen_port;
use admitgate_proxy::proxy_config::ProxyConfig;
use admitgate_proxy::proxy_service::{GatewayService, Upstream, UpstreamPools};
use admitgate_proxy::server::serve;
use admitgate_proxy::session::{ForwardedAuthResolver, SessionResolver, StaticTokenResolver};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::{error, info, warn};

/// Where admission decisions are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreMode {
    /// Redis-compatible REST store (KV_REST_API_URL / KV_REST_API_TOKEN)
    Kv,
    /// Process-local store, for local development
    Memory,
    /// Admission gating disabled
    None,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bind address for the gateway listener
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Backend origin, e.g. "https://api.example.com"
    #[arg(long, env = "ADMITGATE_UPSTREAM_URL")]
    upstream_url: String,

    /// Path prefix the gateway is mounted under (overrides ADMITGATE_MOUNT_PREFIX)
    #[arg(long)]
    mount_prefix: Option<String>,

    /// Admission store backend
    #[arg(long, value_enum, env = "ADMITGATE_STORE", default_value = "kv")]
    store: StoreMode,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The guard must outlive the runtime so buffered logs are flushed.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut proxy_config = ProxyConfig::from_env();
    if let Some(prefix) = &cli.mount_prefix {
        proxy_config = proxy_config.with_mount_prefix(prefix);
    }

    let upstream = Upstream::parse(&cli.upstream_url)?;
    let admission = AdmissionController::new(build_store(cli.store)?);
    let resolver = build_resolver();

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let admin = AdminServer::new(admission.clone());
    let admin_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = admin.run(admin_shutdown).await {
            error!(error = %e, "Admin server failed");
        }
    });

    let pools = Arc::new(UpstreamPools::new(&proxy_config)?);
    let gateway = GatewayService::new(upstream.clone(), pools, resolver, proxy_config.clone())
        .with_admission(admission.clone())
        .with_shutdown(shutdown.clone());

    let service_stack = ServiceBuilder::new()
        .layer(logging_layer())
        .service(gateway);

    let bind_addr = format!("{}:{}", cli.bind, listen_port());
    let listener = TcpListener::bind(&bind_addr).await?;

    info!(
        addr = %bind_addr,
        upstream = %upstream,
        mount_prefix = %proxy_config.mount_prefix,
        admission_gated = admission.is_enabled(),
        max_connections = proxy_config.max_concurrent_connections,
        "admitgate listening"
    );

    serve(listener, service_stack, proxy_config, shutdown).await;

    info!("admitgate stopped");
    Ok(())
}

fn build_store(
    mode: StoreMode,
) -> Result<Option<Arc<dyn AdmissionStore>>, Box<dyn std::error::Error>> {
    match mode {
        StoreMode::Kv => match KvRestConfig::from_env() {
            Some(config) => {
                info!(url = %config.url, "Admission gating enabled (KV REST store)");
                Ok(Some(Arc::new(KvRestStore::new(config)?)))
            }
            None => {
                warn!("KV_REST_API_URL / KV_REST_API_TOKEN not set, admission gating disabled");
                Ok(None)
            }
        },
        StoreMode::Memory => {
            warn!("Using in-memory admission store; decisions are not shared across instances");
            Ok(Some(Arc::new(InMemoryStore::new())))
        }
        StoreMode::None => {
            info!("Admission gating disabled");
            Ok(None)
        }
    }
}

fn build_resolver() -> Arc<dyn SessionResolver> {
    match StaticTokenResolver::from_env() {
        Some(resolver) => {
            warn!("ADMITGATE_BYPASS_TOKEN set, every request uses the bypass token");
            Arc::new(resolver)
        }
        None => Arc::new(ForwardedAuthResolver),
    }
}

/// SIGINT and SIGTERM both cancel `shutdown`.
fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                shutdown_sigint.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating graceful shutdown");
                    shutdown.cancel();
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                }
            }
        });
    }

    #[cfg(not(unix))]
    let _ = shutdown;
}
