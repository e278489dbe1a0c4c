//! In-use upstream connection handle.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use tokio::sync::OwnedSemaphorePermit;

use crate::load_balancer::backend::{ActiveGuard, Backend};

/// A pooled HTTP/1.1 connection checked out for exactly one exchange.
///
/// Holds the backend's pool slot permit and active-connection guard for as
/// long as it lives; dropping the handle (discard, cancellation, client
/// disconnect) returns both without any explicit cleanup call.
pub struct PooledConnection {
    backend: Arc<Backend>,
    sender: Option<SendRequest<Body>>,
    /// Whether this transport was reused from the idle list.
    reused: bool,
    checked_out: Instant,
    _active: ActiveGuard,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub(crate) fn new(
        backend: Arc<Backend>,
        sender: SendRequest<Body>,
        reused: bool,
        active: ActiveGuard,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            backend,
            sender: Some(sender),
            reused,
            checked_out: Instant::now(),
            _active: active,
            _permit: permit,
        }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// True if this exchange rides a reused transport.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn checked_out_at(&self) -> Instant {
        self.checked_out
    }

    /// Send one request on this connection.
    pub async fn send(&mut self, request: Request<Body>) -> hyper::Result<hyper::Response<Incoming>> {
        let sender = self
            .sender
            .as_mut()
            .expect("connection already released");
        sender.send_request(request).await
    }

    /// Take the transport back out for return to the idle list. The
    /// accounting guards stay with `self` and release when it drops.
    pub(crate) fn take_sender(&mut self) -> Option<SendRequest<Body>> {
        self.sender.take()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("backend", &self.backend.addr)
            .field("reused", &self.reused)
            .finish()
    }
}
