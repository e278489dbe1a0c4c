//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server
//! - Track active connections (for tie-breaking and draining)
//! - Track health state with hysteresis counters
//!
//! # State Transitions
//! ```text
//! Healthy → Down:    consecutive failures >= unhealthy_threshold
//! Down → Healthy:    consecutive successes >= healthy_threshold
//! any → Draining:    deregistration; terminal, probes ignored
//! ```

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Backend status. Stored in an `AtomicU8` so snapshot readers never
/// observe a torn update.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Healthy = 0,
    Draining = 1,
    Down = 2,
}

impl From<u8> for BackendStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => BackendStatus::Draining,
            2 => BackendStatus::Down,
            _ => BackendStatus::Healthy,
        }
    }
}

/// A single upstream server.
#[derive(Debug)]
pub struct Backend {
    /// Identifier from config, used in logs and metrics.
    pub name: String,
    /// The address of the backend. This is its identity.
    pub addr: SocketAddr,
    /// Maximum concurrent upstream connections allowed.
    pub max_connections: usize,

    /// Weight for weighted selection. Mutated only on config reload.
    weight: AtomicU32,
    /// Number of connections currently in use against this backend.
    active_connections: AtomicUsize,
    /// Current status (0=Healthy, 1=Draining, 2=Down).
    status: AtomicU8,
    /// Consecutive probe/request failures.
    consecutive_failures: AtomicUsize,
    /// Consecutive probe/request successes.
    consecutive_successes: AtomicUsize,
    /// When this backend was last probed.
    last_probe: Mutex<Option<Instant>>,
}

impl Backend {
    /// Create a new backend. Backends start healthy; the prober demotes.
    pub fn new(name: impl Into<String>, addr: SocketAddr, weight: u32, max_connections: usize) -> Self {
        Self {
            name: name.into(),
            addr,
            max_connections,
            weight: AtomicU32::new(weight),
            active_connections: AtomicUsize::new(0),
            status: AtomicU8::new(BackendStatus::Healthy as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            last_probe: Mutex::new(None),
        }
    }

    pub fn status(&self) -> BackendStatus {
        self.status.load(Ordering::Relaxed).into()
    }

    /// Force a status. Draining is sticky; see [`Backend::mark_success`].
    pub fn set_status(&self, status: BackendStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    /// True if this backend may receive new traffic.
    pub fn is_selectable(&self) -> bool {
        self.status() == BackendStatus::Healthy
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    /// Update the weight in place (config reload).
    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight, Ordering::Relaxed);
    }

    /// Connections currently in use against this backend.
    pub fn active_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Record an in-use connection. The guard decrements on drop, so the
    /// count cannot leak on cancellation or error paths.
    pub fn track_active(self: &Arc<Self>) -> ActiveGuard {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ActiveGuard {
            backend: self.clone(),
        }
    }

    pub fn touch_probe(&self) {
        *self.last_probe.lock().unwrap() = Some(Instant::now());
    }

    pub fn last_probe(&self) -> Option<Instant> {
        *self.last_probe.lock().unwrap()
    }

    /// Report a successful probe or exchange. Returns the new status when
    /// this crosses the healthy threshold.
    pub fn mark_success(&self, healthy_threshold: usize) -> Option<BackendStatus> {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        match self.status() {
            BackendStatus::Healthy | BackendStatus::Draining => None,
            BackendStatus::Down => {
                let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= healthy_threshold {
                    self.consecutive_successes.store(0, Ordering::Relaxed);
                    self.status
                        .store(BackendStatus::Healthy as u8, Ordering::Relaxed);
                    Some(BackendStatus::Healthy)
                } else {
                    None
                }
            }
        }
    }

    /// Report a failed probe or exchange. Returns the new status when this
    /// crosses the unhealthy threshold.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> Option<BackendStatus> {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        match self.status() {
            BackendStatus::Down | BackendStatus::Draining => None,
            BackendStatus::Healthy => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= unhealthy_threshold {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    self.status
                        .store(BackendStatus::Down as u8, Ordering::Relaxed);
                    Some(BackendStatus::Down)
                } else {
                    None
                }
            }
        }
    }
}

/// RAII guard for one in-use connection slot.
#[derive(Debug)]
pub struct ActiveGuard {
    backend: Arc<Backend>,
}

impl Deref for ActiveGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.backend
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}
