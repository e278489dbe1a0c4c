//! Client connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection ids for tracing
//! - Track the number of open client connections
//! - Feed the active-connections gauge

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient; only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts open client connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The guard decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened();
        let guard = ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        };
        tracing::trace!(connection_id = %guard.id, "Connection opened");
        guard
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }
}

/// Guard for one connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        metrics::connection_closed();
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
