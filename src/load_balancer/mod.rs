//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → backend group identified
//!     → registry.rs (consistent snapshot of the group)
//!     → Apply selection strategy:
//!         - weighted.rs (smooth weighted round robin, default)
//!         - round_robin.rs (rotate through backends)
//!         - least_conn.rs (fewest active connections)
//!     → Return backend or NoHealthyBackend
//! ```
//!
//! # Design Decisions
//! - Only Healthy backends are candidates; Down is never a silent fallback
//! - Selection state is per group, behind its own lock
//! - Backend health and counters are atomics; snapshots are never torn

use std::sync::Arc;

pub mod backend;
pub mod least_conn;
pub mod registry;
pub mod round_robin;
pub mod weighted;

use backend::Backend;

/// A backend selection strategy.
///
/// Implementations see the full group and must skip non-selectable members;
/// returning `None` means no healthy backend exists.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}

/// Build the configured strategy. Unknown names fall back to weighted,
/// which validation rules out for file-loaded configs.
pub fn strategy_from_name(name: &str) -> Box<dyn LoadBalancer> {
    match name {
        "round_robin" => Box::new(round_robin::RoundRobin::new()),
        "least_connections" => Box::new(least_conn::LeastConnections::new()),
        _ => Box::new(weighted::WeightedRoundRobin::new()),
    }
}
