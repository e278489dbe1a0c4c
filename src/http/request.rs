//! Request identification.
//!
//! # Responsibilities
//! - Assign every inbound request a unique id as early as possible
//! - Respect an id supplied by the caller (trusted front hops)
//! - Expose the id to handlers and to the forwarded request
//!
//! # Design Decisions
//! - UUID v4; uniqueness matters, ordering does not
//! - The id travels as both a header and a request extension

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use tower::{Layer, Service};
use uuid::Uuid;

/// Canonical request id header.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Request id extension value.
#[derive(Debug, Clone)]
pub struct RequestId(String);

impl RequestId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Convenience accessor for the id a request carries.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl RequestIdExt for Request<Body> {
    fn request_id(&self) -> Option<&str> {
        self.extensions()
            .get::<RequestId>()
            .map(RequestId::as_str)
            .or_else(|| {
                self.headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
            })
    }
}

/// Layer that stamps requests with an id before anything else runs.
#[derive(Debug, Clone, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
where
    S: Service<Request<Body>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let id = req
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(|s| RequestId(s.to_string()))
            .unwrap_or_else(RequestId::generate);

        if let Ok(value) = HeaderValue::from_str(id.as_str()) {
            req.headers_mut().insert(X_REQUEST_ID, value);
        }
        req.extensions_mut().insert(id);

        self.inner.call(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct Echo;

    impl Service<Request<Body>> for Echo {
        type Response = Request<Body>;
        type Error = std::convert::Infallible;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Body>) -> Self::Future {
            std::future::ready(Ok(req))
        }
    }

    #[tokio::test]
    async fn generates_id_when_absent() {
        let svc = RequestIdLayer.layer(Echo);
        let req = Request::builder().body(Body::empty()).unwrap();

        let seen = svc.oneshot(req).await.unwrap();
        let id = seen.request_id().unwrap().to_string();
        assert!(!id.is_empty());
        assert_eq!(seen.headers().get(X_REQUEST_ID).unwrap().to_str().unwrap(), id);
    }

    #[tokio::test]
    async fn preserves_existing_id() {
        let svc = RequestIdLayer.layer(Echo);
        let req = Request::builder()
            .header(X_REQUEST_ID, "upstream-id-1")
            .body(Body::empty())
            .unwrap();

        let seen = svc.oneshot(req).await.unwrap();
        assert_eq!(seen.request_id(), Some("upstream-id-1"));
    }
}
