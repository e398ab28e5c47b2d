//! Listener port configuration.
//!
//! | Port | Env Variable | Default | Purpose |
//! |------|--------------|---------|---------|
//! | 7480 | `ADMITGATE_LISTEN_PORT` | 7480 | Client traffic → backend |
//! | 7481 | `ADMITGATE_ADMIN_PORT` | 7481 | Health and capacity |

/// Default port for proxied client traffic.
pub const DEFAULT_LISTEN_PORT: u16 = 7480;

/// Default port for the admin server.
pub const DEFAULT_ADMIN_PORT: u16 = 7481;

/// Get the gateway listen port from environment or default.
///
/// # Example
///
/// ```rust
/// use admitgate_proxy::ports::listen_port;
///
/// let port = listen_port();
/// assert!(port > 0);
/// ```
pub fn listen_port() -> u16 {
    port_from_env("ADMITGATE_LISTEN_PORT", DEFAULT_LISTEN_PORT)
}

/// Get the admin port from environment or default.
pub fn admin_port() -> u16 {
    port_from_env("ADMITGATE_ADMIN_PORT", DEFAULT_ADMIN_PORT)
}

fn port_from_env(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
