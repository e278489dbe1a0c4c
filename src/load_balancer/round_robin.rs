//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through backends.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        // Scan at most one full rotation so an all-down group terminates.
        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = backends.len();

        for i in 0..len {
            let backend = &backends[(start + i) % len];
            if backend.is_selectable() {
                return Some(backend.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::backend::BackendStatus;

    fn backend(port: u16) -> Arc<Backend> {
        Arc::new(Backend::new(
            format!("b{port}"),
            format!("127.0.0.1:{port}").parse().unwrap(),
            1,
            100,
        ))
    }

    #[test]
    fn rotates_through_backends() {
        let lb = RoundRobin::new();
        let backends = vec![backend(8080), backend(8081)];

        let s1 = lb.select(&backends).unwrap();
        assert_eq!(s1.addr, backends[0].addr);

        let s2 = lb.select(&backends).unwrap();
        assert_eq!(s2.addr, backends[1].addr);

        let s3 = lb.select(&backends).unwrap();
        assert_eq!(s3.addr, backends[0].addr);
    }

    #[test]
    fn skips_down_backends() {
        let lb = RoundRobin::new();
        let backends = vec![backend(8080), backend(8081)];
        backends[0].set_status(BackendStatus::Down);

        for _ in 0..10 {
            assert_eq!(lb.select(&backends).unwrap().addr, backends[1].addr);
        }
    }

    #[test]
    fn all_down_yields_none() {
        let lb = RoundRobin::new();
        let backends = vec![backend(8080), backend(8081)];
        backends[0].set_status(BackendStatus::Down);
        backends[1].set_status(BackendStatus::Down);
        assert!(lb.select(&backends).is_none());
    }
}
