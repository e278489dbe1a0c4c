//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Least connections selector.
/// Selects the healthy backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastConnections {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // In case of tie, the first one is selected (stability).
        backends
            .iter()
            .filter(|b| b.is_selectable())
            .min_by_key(|b| b.active_count())
            .cloned()
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
    fn picks_least_loaded() {
        let lb = LeastConnections::new();
        let b1 = backend(8080);
        let b2 = backend(8081);

        let _g1 = b1.track_active();
        let backends = vec![b1.clone(), b2.clone()];

        // b2 has 0 active connections.
        assert_eq!(lb.select(&backends).unwrap().addr, b2.addr);

        let _g2 = b2.track_active();
        let _g3 = b2.track_active();

        // Now b2 has 2, b1 has 1.
        assert_eq!(lb.select(&backends).unwrap().addr, b1.addr);
    }

    #[test]
    fn ignores_down_backends_regardless_of_load() {
        let lb = LeastConnections::new();
        let b1 = backend(8080);
        let b2 = backend(8081);
        b1.set_status(BackendStatus::Down);

        let _g = b2.track_active();
        let backends = vec![b1, b2.clone()];
        assert_eq!(lb.select(&backends).unwrap().addr, b2.addr);
    }
}
