//! Runtime configuration for the gateway.
//!
//! All parameters can be overridden via environment variables. Invalid
//! values are logged and replaced by the default rather than aborting
//! startup.

use std::time::Duration;
use tracing::warn;

/// Runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Path prefix under which the gateway is mounted (e.g. `/api`).
    /// Stripped before the remaining segments are forwarded.
    pub mount_prefix: String,

    /// Enable TCP_NODELAY on accepted and upstream sockets
    pub tcp_nodelay: bool,

    /// TCP keepalive interval in seconds
    pub tcp_keepalive_secs: u64,

    /// Upstream connect timeout
    pub connect_timeout: Duration,

    /// Maximum number of idle connections kept per upstream host in each
    /// keep-alive pool.
    pub pool_max_idle_per_host: usize,

    /// How long an idle pooled connection is kept before being closed.
    pub pool_idle_timeout: Duration,

    /// Maximum concurrently served client connections. Excess connections
    /// receive 503 immediately.
    pub max_concurrent_connections: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mount_prefix: "/api".to_string(),
            tcp_nodelay: true,
            tcp_keepalive_secs: 60,
            connect_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 128,
            pool_idle_timeout: Duration::from_secs(90),
            max_concurrent_connections: 10000,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Environment Variables
    ///
    /// - `ADMITGATE_MOUNT_PREFIX` (default: /api)
    /// - `ADMITGATE_TCP_NODELAY` (default: true)
    /// - `ADMITGATE_TCP_KEEPALIVE_SECS` (default: 60)
    /// - `ADMITGATE_CONNECT_TIMEOUT_SECS` (default: 10)
    /// - `ADMITGATE_POOL_MAX_IDLE` (default: 128)
    /// - `ADMITGATE_POOL_IDLE_TIMEOUT_SECS` (default: 90)
    /// - `ADMITGATE_MAX_CONCURRENT_CONNECTIONS` (default: 10000)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            mount_prefix: std::env::var("ADMITGATE_MOUNT_PREFIX")
                .map(|p| normalize_prefix(&p))
                .unwrap_or(default.mount_prefix),

            tcp_nodelay: parse_env_warn("ADMITGATE_TCP_NODELAY", default.tcp_nodelay),

            tcp_keepalive_secs: parse_env_warn(
                "ADMITGATE_TCP_KEEPALIVE_SECS",
                default.tcp_keepalive_secs,
            ),

            connect_timeout: Duration::from_secs(parse_env_warn(
                "ADMITGATE_CONNECT_TIMEOUT_SECS",
                default.connect_timeout.as_secs(),
            )),

            pool_max_idle_per_host: parse_env_warn(
                "ADMITGATE_POOL_MAX_IDLE",
                default.pool_max_idle_per_host,
            ),

            pool_idle_timeout: Duration::from_secs(parse_env_warn(
                "ADMITGATE_POOL_IDLE_TIMEOUT_SECS",
                default.pool_idle_timeout.as_secs(),
            )),

            max_concurrent_connections: parse_env_warn(
                "ADMITGATE_MAX_CONCURRENT_CONNECTIONS",
                default.max_concurrent_connections,
            ),
        }
    }

    /// Override the mount prefix.
    pub fn with_mount_prefix(mut self, prefix: &str) -> Self {
        self.mount_prefix = normalize_prefix(prefix);
        self
    }
}

/// `"api/"` → `"/api"`, `"/"` → `""`.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Parse an environment variable with a warning on invalid values.
///
/// If the env var is set but cannot be parsed, logs a warning and returns the default.
/// If the env var is not set, returns the default silently.
fn parse_env_warn<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();

        assert_eq!(config.mount_prefix, "/api");
        assert!(config.tcp_nodelay);
        assert_eq!(config.tcp_keepalive_secs, 60);
        assert_eq!(config.pool_max_idle_per_host, 128);
        assert_eq!(config.pool_idle_timeout, Duration::from_secs(90));
        assert_eq!(config.max_concurrent_connections, 10000);
    }

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix("/api"), "/api");
        assert_eq!(normalize_prefix("api/"), "/api");
        assert_eq!(normalize_prefix("/gateway/api/"), "/gateway/api");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
    }

    #[test]
    #[serial_test::serial]
    fn test_config_env_loading() {
        unsafe {
            std::env::set_var("ADMITGATE_POOL_MAX_IDLE", "16");
            std::env::set_var("ADMITGATE_MOUNT_PREFIX", "proxy/");
            std::env::set_var("ADMITGATE_POOL_IDLE_TIMEOUT_SECS", "30");
        }

        let config = ProxyConfig::from_env();
        assert_eq!(config.pool_max_idle_per_host, 16);
        assert_eq!(config.mount_prefix, "/proxy");
        assert_eq!(config.pool_idle_timeout, Duration::from_secs(30));

        unsafe {
            std::env::remove_var("ADMITGATE_POOL_MAX_IDLE");
            std::env::remove_var("ADMITGATE_MOUNT_PREFIX");
            std::env::remove_var("ADMITGATE_POOL_IDLE_TIMEOUT_SECS");
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_invalid_env_value_uses_default() {
        unsafe {
            std::env::set_var("ADMITGATE_TCP_NODELAY", "maybe");
        }
        let config = ProxyConfig::from_env();
        assert!(config.tcp_nodelay);
        unsafe {
            std::env::remove_var("ADMITGATE_TCP_NODELAY");
        }
    }
}
