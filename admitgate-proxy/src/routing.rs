//! Path and query rewriting for forwarded requests.
//!
//! The gateway is mounted under a prefix (default `/api`). Everything after
//! the prefix is treated as wildcard segments and re-joined into the literal
//! upstream path. Only versioned API roots (`v1`, `v2`, ...) and `observe`
//! are forwarded.
//!
//! Control parameters `project` and `organization` are lifted out of the
//! query string into `X-Project` / `X-Organization` headers.

use crate::error::{ProxyError, ProxyResult};
use http::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use http::Uri;
use url::form_urlencoded;

pub const X_PROJECT: HeaderName = HeaderName::from_static("x-project");
pub const X_ORGANIZATION: HeaderName = HeaderName::from_static("x-organization");
pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

const PROJECT_PARAM: &str = "project";
const ORGANIZATION_PARAM: &str = "organization";

/// Map an inbound path to the upstream path.
///
/// `"/api/v1/threads/abc"` with prefix `"/api"` becomes `"/v1/threads/abc"`.
/// Empty segments are collapsed. Paths outside the prefix, dot segments,
/// and roots other than `v<digits>` / `observe` yield [`ProxyError::NotFound`].
pub fn upstream_path(path: &str, mount_prefix: &str) -> ProxyResult<String> {
    let rest = if mount_prefix.is_empty() {
        path
    } else {
        match path.strip_prefix(mount_prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => return Err(ProxyError::NotFound(path.to_string())),
        }
    };

    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(ProxyError::NotFound(path.to_string()));
    }

    match segments.first() {
        Some(root) if is_routable_root(root) => Ok(join_segments(&segments)),
        _ => Err(ProxyError::NotFound(path.to_string())),
    }
}

/// `["v1", "threads"]` → `"/v1/threads"`.
pub fn join_segments(segments: &[&str]) -> String {
    let mut joined = String::with_capacity(segments.iter().map(|s| s.len() + 1).sum());
    for segment in segments {
        joined.push('/');
        joined.push_str(segment);
    }
    joined
}

/// `^v\d+$` or `observe`.
pub fn is_routable_root(segment: &str) -> bool {
    if segment == "observe" {
        return true;
    }
    match segment.strip_prefix('v') {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Query string with control parameters removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ControlParams {
    pub project: Option<String>,
    pub organization: Option<String>,
    /// Remaining pairs in original order, `None` when nothing is left.
    pub query: Option<String>,
}

/// Split `project` / `organization` out of a query string.
///
/// The first value of each control key is promoted; every occurrence is
/// removed from the forwarded query. Other pairs are forwarded byte for byte.
pub fn split_control_params(query: Option<&str>) -> ControlParams {
    let mut params = ControlParams::default();
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return params;
    };

    let mut kept: Vec<&str> = Vec::new();
    let mut removed_any = false;

    for raw in query.split('&').filter(|pair| !pair.is_empty()) {
        let Some((key, value)) = form_urlencoded::parse(raw.as_bytes()).next() else {
            kept.push(raw);
            continue;
        };
        match key.as_ref() {
            PROJECT_PARAM => {
                params.project.get_or_insert_with(|| value.into_owned());
                removed_any = true;
            }
            ORGANIZATION_PARAM => {
                params.organization.get_or_insert_with(|| value.into_owned());
                removed_any = true;
            }
            _ => kept.push(raw),
        }
    }

    params.query = if !removed_any {
        Some(query.to_owned())
    } else if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    };
    params
}

/// Per-request rewrite: target path plus the headers the gateway injects.
#[derive(Debug, Clone)]
pub struct ProxyRequestContext {
    /// Upstream path with the rewritten query, e.g. `/v1/threads/abc?limit=5`
    pub path_and_query: String,
    /// `authorization`, optional `x-project` / `x-organization` / `x-correlation-id`
    pub headers: HeaderMap,
}

impl ProxyRequestContext {
    /// Build the rewrite for `uri` on behalf of a session holding `access_token`.
    pub fn build(
        uri: &Uri,
        inbound: &HeaderMap,
        access_token: &str,
        mount_prefix: &str,
    ) -> ProxyResult<Self> {
        let path = upstream_path(uri.path(), mount_prefix)?;
        let control = split_control_params(uri.query());

        let path_and_query = match &control.query {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        let mut headers = HeaderMap::with_capacity(4);

        let mut bearer = header_value(&format!("Bearer {access_token}"), "authorization")?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        if let Some(project) = &control.project {
            headers.insert(X_PROJECT, header_value(project, "x-project")?);
        }
        if let Some(organization) = &control.organization {
            headers.insert(X_ORGANIZATION, header_value(organization, "x-organization")?);
        }
        if let Some(correlation_id) = inbound.get(&X_CORRELATION_ID) {
            headers.insert(X_CORRELATION_ID, correlation_id.clone());
        }

        Ok(Self {
            path_and_query,
            headers,
        })
    }
}

fn header_value(value: &str, name: &str) -> ProxyResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| ProxyError::Internal(format!("invalid value for header {name}")))
}
