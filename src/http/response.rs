//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map engine errors to stable client-facing responses
//! - Strip hop-by-hop headers before relaying
//! - Decide whether an upstream transport may be reused
//!
//! # Design Decisions
//! - Routing/availability failures are distinguishable from generic
//!   internal errors by status and body
//! - Error bodies are short fixed strings; detail goes to the log only
//! - Hop-by-hop headers are connection-scoped and never forwarded

use axum::body::Body;
use axum::http::header::HeaderMap;
use axum::http::{Response, Version};

use crate::error::ProxyError;

/// Headers scoped to a single transport hop (RFC 9110 §7.6.1).
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Build the client-facing response for a failed request.
pub fn error_response(err: &ProxyError) -> Response<Body> {
    Response::builder()
        .status(err.status())
        .header("content-type", "text/plain; charset=utf-8")
        .body(Body::from(err.client_message()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Remove hop-by-hop headers in place, honoring any extra names listed in
/// the Connection header itself.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let connection_listed: Vec<String> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_lowercase())
        .collect();

    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    for name in connection_listed {
        headers.remove(name.as_str());
    }
}

/// Whether the upstream transport may serve another exchange after this
/// response completes.
pub fn transport_reusable(version: Version, headers: &HeaderMap) -> bool {
    if version != Version::HTTP_11 {
        return false;
    }
    !headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}
