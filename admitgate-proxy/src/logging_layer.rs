//! Tower layer for structured request/response logging.
//!
//! Uses `tower_http::trace::TraceLayer` for the middleware plumbing, with
//! callbacks that attach the caller's correlation id to the request span and
//! redact credential headers.

use crate::routing::X_CORRELATION_ID;
use crate::session::FORWARDED_ACCESS_TOKEN_HEADER;
use http::HeaderMap;
use std::fmt;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, TraceLayer};
use tracing::{info, warn};

/// Headers that are redacted from logs.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "proxy-authorization",
    "x-api-key",
    FORWARDED_ACCESS_TOKEN_HEADER,
];

/// Layer type produced by [`logging_layer`].
pub type GatewayTraceLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    CorrelationMakeSpan,
    OnRequestLogger,
    OnResponseLogger,
    DefaultOnBodyChunk,
    DefaultOnEos,
    OnFailureLogger,
>;

/// Create the logging/tracing layer.
pub fn logging_layer() -> GatewayTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(CorrelationMakeSpan)
        .on_request(OnRequestLogger)
        .on_response(OnResponseLogger)
        .on_failure(OnFailureLogger)
}

/// Opens a `request` span carrying the inbound `x-correlation-id`.
///
/// The id is never generated here; requests without one get an empty field.
#[derive(Clone, Debug)]
pub struct CorrelationMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for CorrelationMakeSpan {
    fn make_span(&mut self, request: &hyper::Request<B>) -> tracing::Span {
        let span = tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            version = ?request.version(),
            correlation_id = tracing::field::Empty,
        );

        if let Some(id) = correlation_id(request.headers()) {
            span.record("correlation_id", id);
        }
        span
    }
}

/// First `x-correlation-id` value, if it is valid UTF-8.
pub fn correlation_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(&X_CORRELATION_ID).and_then(|v| v.to_str().ok())
}

#[derive(Clone, Debug)]
pub struct OnRequestLogger;

impl<B> tower_http::trace::OnRequest<B> for OnRequestLogger {
    fn on_request(&mut self, request: &hyper::Request<B>, _span: &tracing::Span) {
        info!(
            method = %request.method(),
            path = %request.uri().path(),
            direction = "inbound",
            "Request received"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                headers = ?sanitize_headers(request.headers()),
                "Request details"
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnResponseLogger;

impl<B> tower_http::trace::OnResponse<B> for OnResponseLogger {
    fn on_response(
        self,
        response: &hyper::Response<B>,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        info!(
            status = %response.status().as_u16(),
            latency_ms = latency.as_millis(),
            direction = "outbound",
            "Response sent"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                headers = ?sanitize_headers(response.headers()),
                "Response details"
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnFailureLogger;

impl tower_http::trace::OnFailure<ServerErrorsFailureClass> for OnFailureLogger {
    fn on_failure(
        &mut self,
        failure: ServerErrorsFailureClass,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis(),
            direction = "error",
            "Request failed"
        );
    }
}

/// Zero-allocation `Debug` view of a header map with credentials redacted.
pub struct SanitizedHeaders<'a>(&'a HeaderMap);

impl fmt::Debug for SanitizedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX_HEADERS_TO_LOG: usize = 50;
        const MAX_VALUE_LEN: usize = 1024;

        let mut map = f.debug_map();

        for (idx, (name, value)) in self.0.iter().enumerate() {
            if idx >= MAX_HEADERS_TO_LOG {
                map.entry(&"...", &format!("({} more headers)", self.0.len() - idx));
                break;
            }

            let name_str = name.as_str();
            let is_sensitive = value.is_sensitive()
                || SENSITIVE_HEADERS
                    .iter()
                    .any(|&sensitive| name_str.eq_ignore_ascii_case(sensitive));

            if is_sensitive {
                map.entry(&name_str, &"[REDACTED]");
                continue;
            }

            match value.to_str() {
                Ok(val_str) if val_str.len() <= MAX_VALUE_LEN => {
                    map.entry(&name_str, &val_str);
                }
                Ok(val_str) => {
                    map.entry(
                        &name_str,
                        &format!("{}... ({} bytes)", &val_str[..MAX_VALUE_LEN], val_str.len()),
                    );
                }
                Err(_) => {
                    map.entry(&name_str, &format!("<binary: {} bytes>", value.len()));
                }
            }
        }

        map.finish()
    }
}

#[inline]
pub fn sanitize_headers(headers: &HeaderMap) -> SanitizedHeaders<'_> {
    SanitizedHeaders(headers)
}
