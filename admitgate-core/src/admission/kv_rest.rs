//! Redis-compatible REST key-value store client.
//!
//! Speaks the Upstash / Vercel KV REST dialect: every command is a JSON array
//! POSTed to the base URL with a bearer token, and every reply is a JSON
//! object holding either `result` or `error`.
//!
//! ```text
//! POST https://kv.example.com
//! Authorization: Bearer <token>
//! ["LINDEX", "usersWaitlist", "-1"]
//!
//! 200 {"result": "alice@example.com"}
//! ```
//!
//! ## Security
//!
//! The API token is never logged.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::{AdmissionStore, StoreError, StoreResult};

/// Connection settings for [`KvRestStore`].
#[derive(Clone)]
pub struct KvRestConfig {
    /// Base URL of the REST endpoint.
    pub url: String,
    /// Bearer token (NEVER log this value).
    token: String,
    /// Per-command timeout, including connect.
    pub timeout: Duration,
    /// Idle keep-alive connections retained per host.
    pub pool_max_idle_per_host: usize,
}

impl std::fmt::Debug for KvRestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvRestConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .finish()
    }
}

impl KvRestConfig {
    /// Create a config with default timeouts.
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            timeout: Duration::from_secs(2),
            pool_max_idle_per_host: 16,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KV_REST_API_URL` - REST endpoint base URL
    /// - `KV_REST_API_TOKEN` - bearer token
    /// - `ADMITGATE_KV_TIMEOUT_SECS` (default: 2)
    ///
    /// Returns `None` when the URL or token is missing or empty, which
    /// disables admission gating for the deployment.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("KV_REST_API_URL").ok().filter(|v| !v.is_empty())?;
        let token = std::env::var("KV_REST_API_TOKEN")
            .ok()
            .filter(|v| !v.is_empty())?;

        let timeout_secs = match std::env::var("ADMITGATE_KV_TIMEOUT_SECS") {
            Ok(val) => val.parse::<u64>().unwrap_or_else(|_| {
                warn!(
                    env_var = "ADMITGATE_KV_TIMEOUT_SECS",
                    value = %val,
                    default = 2u64,
                    "Invalid value for environment variable, using default"
                );
                2
            }),
            Err(_) => 2,
        };

        Some(Self::new(url, token).with_timeout(Duration::from_secs(timeout_secs)))
    }

    /// Set the per-command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Reply envelope of the REST dialect.
#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// REST-backed implementation of [`AdmissionStore`].
///
/// The underlying `reqwest` client keeps a keep-alive pool, so one instance
/// should be shared for the life of the process.
#[derive(Clone)]
pub struct KvRestStore {
    client: Client,
    config: KvRestConfig,
}

impl KvRestStore {
    /// Build the store client.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Protocol`] if the URL is not an absolute URL or
    /// the HTTP client cannot be built.
    pub fn new(config: KvRestConfig) -> StoreResult<Self> {
        reqwest::Url::parse(&config.url)
            .map_err(|e| StoreError::Protocol(format!("invalid store URL '{}': {e}", config.url)))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| StoreError::Protocol(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Execute one command and return its `result` value.
    async fn command(&self, args: &[&str]) -> StoreResult<Value> {
        let op = args.first().copied().unwrap_or_default();
        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.token)
            .json(args)
            .send()
            .await
            .map_err(|e| {
                warn!(op = %op, error = %e, "Admission store request failed");
                StoreError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() {
            warn!(op = %op, status = %status, "Admission store returned server error");
            return Err(StoreError::Unreachable(format!("HTTP {status}")));
        }

        let reply: CommandReply = response.json().await.map_err(|e| {
            StoreError::Protocol(format!("{op}: malformed reply (HTTP {status}): {e}"))
        })?;

        if let Some(error) = reply.error {
            return Err(StoreError::Rejected(format!("{op}: {error}")));
        }
        if !status.is_success() {
            return Err(StoreError::Protocol(format!("{op}: HTTP {status}")));
        }

        debug!(op = %op, "Admission store command completed");
        Ok(reply.result.unwrap_or(Value::Null))
    }
}

/// Interpret a reply as an optional string.
fn optional_string(op: &str, value: Value) -> StoreResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        // Counters may come back as numbers depending on how they were written.
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(StoreError::Protocol(format!(
            "{op}: expected string or null, got {other}"
        ))),
    }
}

#[async_trait]
impl AdmissionStore for KvRestStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        optional_string("GET", self.command(&["GET", key]).await?)
    }

    async fn list_tail(&self, key: &str) -> StoreResult<Option<String>> {
        optional_string("LINDEX", self.command(&["LINDEX", key, "-1"]).await?)
    }

    async fn list_append(&self, key: &str, value: &str) -> StoreResult<u64> {
        match self.command(&["RPUSH", key, value]).await? {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| StoreError::Protocol(format!("RPUSH: invalid length {n}"))),
            other => Err(StoreError::Protocol(format!(
                "RPUSH: expected integer, got {other}"
            ))),
        }
    }
}
