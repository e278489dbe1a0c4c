//! Smooth weighted round-robin strategy (default).
//!
//! Each backend carries a running current weight: every round each healthy
//! candidate gains its configured weight, the highest current weight wins,
//! and the winner pays back the total. Over a window the selection share of
//! each backend converges to weight / total, without bursts onto the
//! heaviest backend.
//!
//! Ties on current weight are broken by the lower active-connection count,
//! so equally-weighted backends do not herd under bursty load.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::load_balancer::{backend::Backend, LoadBalancer};

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    /// Current weight per backend address. Entries for addresses that
    /// leave the candidate set are pruned on the next selection.
    current: Mutex<HashMap<SocketAddr, i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let candidates: Vec<&Arc<Backend>> =
            backends.iter().filter(|b| b.is_selectable()).collect();
        if candidates.is_empty() {
            return None;
        }
        if candidates.len() == 1 {
            return Some(candidates[0].clone());
        }

        let mut current = self.current.lock().unwrap();
        current.retain(|addr, _| candidates.iter().any(|b| b.addr == *addr));

        let mut total: i64 = 0;
        for backend in &candidates {
            let weight = i64::from(backend.weight());
            total += weight;
            *current.entry(backend.addr).or_insert(0) += weight;
        }

        let mut best: &Arc<Backend> = candidates[0];
        let mut best_weight = current[&best.addr];
        for &backend in candidates.iter().skip(1) {
            let cw = current[&backend.addr];
            // Strictly higher wins; on a tie prefer the less loaded of the
            // two, comparing only the pair at hand.
            if cw > best_weight || (cw == best_weight && backend.active_count() < best.active_count())
            {
                best = backend;
                best_weight = cw;
            }
        }

        *current.get_mut(&best.addr).unwrap() -= total;
        Some(best.clone())
    }
}
