//! Client-visible error taxonomy.
//!
//! Every failure the gateway reports to a client is tagged with exactly one
//! [`ErrorKind`]. The kind is serialized into the JSON error body, so the
//! string forms are part of the wire contract.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error kinds surfaced to gateway clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller did not supply a usable identity.
    MissingIdentity,
    /// Admission was denied or timed out.
    Unauthorized,
    /// No session could be resolved for the request.
    AuthError,
    /// Path is not routable to the backend.
    NotFound,
    /// Backend (or the admission store) unreachable or reset.
    ServiceUnavailable,
    /// Unclassified failure.
    InternalError,
}

impl ErrorKind {
    /// Wire representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingIdentity => "missing_identity",
            Self::Unauthorized => "unauthorized",
            Self::AuthError => "auth_error",
            Self::NotFound => "not_found",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InternalError => "internal_error",
        }
    }

    /// The HTTP status normally paired with this kind.
    ///
    /// Callers may override it: a reset upstream connection is reported as
    /// `service_unavailable` with status 504.
    pub fn default_status(&self) -> u16 {
        match self {
            Self::MissingIdentity => 400,
            Self::Unauthorized => 403,
            Self::AuthError => 401,
            Self::NotFound => 404,
            Self::ServiceUnavailable => 503,
            Self::InternalError => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
