//! Session resolution for inbound requests.
//!
//! The gateway never authenticates users itself. It either runs in bypass
//! mode with a fixed upstream token, or trusts an authenticating edge that
//! places the user's access token and verified email on forwarded headers.

use async_trait::async_trait;
use http::HeaderMap;
use std::fmt;

/// Access token forwarded by the authenticating edge.
pub const FORWARDED_ACCESS_TOKEN_HEADER: &str = "x-forwarded-access-token";

/// Verified email forwarded by the authenticating edge.
pub const FORWARDED_EMAIL_HEADER: &str = "x-forwarded-email";

/// Resolved credentials for one request.
#[derive(Clone)]
pub struct Session {
    /// Bearer token sent to the backend
    pub access_token: String,
    /// Verified email, used as the admission identity
    pub email: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("email", &self.email)
            .finish()
    }
}

/// Resolves a session from request headers.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Returns `None` when no session can be established.
    async fn resolve(&self, headers: &HeaderMap) -> Option<Session>;
}

/// Bypass mode: every request carries the same upstream token.
///
/// The admission identity is read from `x-forwarded-email` as sent by the
/// client. Nothing verifies it, so any caller can claim an already admitted
/// email. Run bypass mode only behind an edge that sets or strips that header.
pub struct StaticTokenResolver {
    token: String,
}

impl StaticTokenResolver {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Reads `ADMITGATE_BYPASS_TOKEN`. Returns `None` if unset or empty.
    pub fn from_env() -> Option<Self> {
        std::env::var("ADMITGATE_BYPASS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl SessionResolver for StaticTokenResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Session> {
        Some(Session {
            access_token: self.token.clone(),
            email: header_str(headers, FORWARDED_EMAIL_HEADER).map(str::to_owned),
        })
    }
}

/// Trusts `x-forwarded-access-token` / `x-forwarded-email` set by an
/// oauth2-proxy style edge in front of the gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardedAuthResolver;

#[async_trait]
impl SessionResolver for ForwardedAuthResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Session> {
        let token = header_str(headers, FORWARDED_ACCESS_TOKEN_HEADER)?;

        Some(Session {
            access_token: token.to_owned(),
            email: header_str(headers, FORWARDED_EMAIL_HEADER).map(str::to_owned),
        })
    }
}

/// First value of `name`, trimmed, if it is valid UTF-8 and non-empty.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
