//! Request-path error taxonomy.
//!
//! # Responsibilities
//! - Classify every way a proxied request can fail
//! - Map each failure to a stable client-facing status and message
//! - Keep internal detail (backend addresses, IO errors) out of responses
//!
//! # Design Decisions
//! - Routing and availability failures get distinct, stable responses
//! - Unexpected upstream detail goes to the log, never to the client
//! - No request error is ever fatal to the process

use axum::http::StatusCode;

use crate::upstream::AcquireError;

/// Terminal failure of a single proxied request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// No rule in the table matched the request.
    #[error("no route matched")]
    NoRoute,

    /// The matched group has no healthy member.
    #[error("no healthy backend in group {group}")]
    NoHealthyBackend { group: String },

    /// Connect, pool or protocol failures exhausted the bounded retries.
    #[error("upstream unavailable: {reason}")]
    Unavailable { reason: String },

    /// The request deadline expired at some stage.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Request body exceeded the configured limit while buffering.
    #[error("request body too large")]
    BodyTooLarge,

    /// A header replace rule did not match the incoming value.
    #[error("header {name} did not match rewrite pattern")]
    HeaderRewrite { name: String },
}

impl ProxyError {
    /// Status code returned to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRoute => StatusCode::NOT_FOUND,
            ProxyError::NoHealthyBackend { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Unavailable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::HeaderRewrite { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable message for the response body. Never includes backend detail.
    pub fn client_message(&self) -> &'static str {
        match self {
            ProxyError::NoRoute => "No matching route found",
            ProxyError::NoHealthyBackend { .. } => "No healthy backends",
            ProxyError::Unavailable { .. } => "Upstream request failed",
            ProxyError::DeadlineExceeded => "Upstream timed out",
            ProxyError::BodyTooLarge => "Request body too large",
            ProxyError::HeaderRewrite { .. } => "Invalid request header",
        }
    }

    /// Label used on error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::NoRoute => "no_route",
            ProxyError::NoHealthyBackend { .. } => "no_healthy_backend",
            ProxyError::Unavailable { .. } => "unavailable",
            ProxyError::DeadlineExceeded => "deadline",
            ProxyError::BodyTooLarge => "body_too_large",
            ProxyError::HeaderRewrite { .. } => "header_rewrite",
        }
    }
}

impl From<AcquireError> for ProxyError {
    fn from(err: AcquireError) -> Self {
        ProxyError::Unavailable {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_statuses_for_routing_and_availability() {
        assert_eq!(ProxyError::NoRoute.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ProxyError::NoHealthyBackend { group: "web".into() }.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ProxyError::Unavailable { reason: "x".into() }.status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ProxyError::DeadlineExceeded.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn client_messages_do_not_leak_detail() {
        let err = ProxyError::Unavailable {
            reason: "connect to 10.0.0.12:9000 refused".into(),
        };
        assert!(!err.client_message().contains("10.0.0.12"));
    }
}
