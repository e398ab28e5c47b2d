//! Error types for the gateway layer.
//!
//! Every failure maps to one [`ErrorKind`] and one HTTP status before any
//! response bytes reach the client.

use admitgate_core::{AdmissionError, ErrorKind};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode, header};
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while handling a gateway request.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// No session could be resolved (401)
    #[error("No session could be resolved")]
    AuthError,

    /// Path is not forwarded to the backend (404)
    #[error("Path not routable: {0}")]
    NotFound(String),

    /// Admission gate outcome (400 / 403 / 503)
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Upstream refused the connection (503)
    #[error("Upstream refused connection: {0}")]
    ConnectionRefused(String),

    /// Upstream reset the connection mid-exchange (504, kind `service_unavailable`)
    #[error("Upstream connection reset: {0}")]
    ConnectionReset(String),

    /// Anything else (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON body returned for every gateway error.
#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: &'static str,
}

impl ProxyError {
    /// Client-visible classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::AuthError => ErrorKind::AuthError,
            ProxyError::NotFound(_) => ErrorKind::NotFound,
            ProxyError::Admission(e) => e.kind(),
            ProxyError::ConnectionRefused(_) | ProxyError::ConnectionReset(_) => {
                ErrorKind::ServiceUnavailable
            }
            ProxyError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// HTTP status sent to the client.
    ///
    /// A reset connection keeps the 504 status of the original mapping even
    /// though its kind is `service_unavailable`.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ConnectionReset(_) => StatusCode::GATEWAY_TIMEOUT,
            other => StatusCode::from_u16(other.kind().default_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Fixed client-facing message. Internal details stay in the logs.
    fn public_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::MissingIdentity => "An identity is required for this request.",
            ErrorKind::Unauthorized => "Access denied.",
            ErrorKind::AuthError => "Authentication required.",
            ErrorKind::NotFound => "Not found.",
            ErrorKind::ServiceUnavailable => "The service is temporarily unavailable.",
            ErrorKind::InternalError => "Internal server error.",
        }
    }

    /// Convert error to an HTTP response with a small JSON body.
    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let body = ErrorBody {
            kind: self.kind(),
            message: self.public_message(),
        };
        let payload = serde_json::to_vec(&body)
            .unwrap_or_else(|_| br#"{"kind":"internal_error"}"#.to_vec());

        Response::builder()
            .status(self.status())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))
            .unwrap_or_else(|_| {
                let mut resp = Response::new(Full::new(Bytes::from_static(
                    br#"{"kind":"internal_error"}"#,
                )));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                resp
            })
    }
}

/// Result type alias for gateway operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
