//! Admin server for health checks and the capacity counter.
//!
//! Runs on a dedicated port (default: 7481), separate from the gateway port
//! so probes never pass through session resolution or admission.
//!
//! - `GET /health`: liveness, JSON with version and uptime
//! - `GET /capacity`: remaining capacity and whether the waitlist is full

use admitgate_core::{AdmissionController, ErrorKind};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ports::admin_port;

/// Admin server configuration.
#[derive(Debug, Clone)]
pub struct AdminServerConfig {
    /// Port to listen on (default: 7481)
    pub port: u16,
    /// Bind address (default: 127.0.0.1)
    pub bind_addr: String,
}

impl Default for AdminServerConfig {
    fn default() -> Self {
        Self {
            port: admin_port(),
            bind_addr: "127.0.0.1".to_string(),
        }
    }
}

impl AdminServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn bind_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Shared state for the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub admission: AdmissionController,
    started_at: Arc<Instant>,
}

pub struct AdminServer {
    config: AdminServerConfig,
    state: AdminState,
}

impl AdminServer {
    pub fn new(admission: AdmissionController) -> Self {
        Self::with_config(admission, AdminServerConfig::default())
    }

    pub fn with_config(admission: AdmissionController, config: AdminServerConfig) -> Self {
        Self {
            config,
            state: AdminState {
                admission,
                started_at: Arc::new(Instant::now()),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/capacity", get(capacity_handler))
            .with_state(self.state.clone())
    }

    /// Bind and serve until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or serve.
    pub async fn run(
        self,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let bind_addr = self.config.bind_string();
        let listener = TcpListener::bind(&bind_addr).await?;

        info!(addr = %bind_addr, "Admin server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Admin server shutting down");
            })
            .await?;

        Ok(())
    }
}

async fn health_handler(State(state): State<AdminState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "admission_gated": state.admission.is_enabled(),
    }))
}

async fn capacity_handler(State(state): State<AdminState>) -> Response {
    match state.admission.capacity().await {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => Json(json!({ "gated": false })).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to read remaining capacity");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "kind": ErrorKind::ServiceUnavailable,
                    "message": "The service is temporarily unavailable.",
                })),
            )
                .into_response()
        }
    }
}
