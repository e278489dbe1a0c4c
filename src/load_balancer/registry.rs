//! Backend registry: owns all known backends, grouped by name.
//!
//! # Responsibilities
//! - Register/deregister backends (idempotent by address)
//! - Hand out consistent group snapshots for selection and probing
//! - Drain deregistered backends instead of severing in-flight traffic
//! - Reconcile the whole set against a reloaded config
//!
//! # Design Decisions
//! - Groups live in a DashMap; members behind a per-group RwLock, so no
//!   global lock serializes the request path
//! - Status and counters are atomics on Backend; readers never see a torn
//!   update
//! - Draining backends with zero active connections are purged lazily on
//!   the next snapshot, not by a sweeper

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::config::BackendConfig;
use crate::load_balancer::backend::{Backend, BackendStatus};
use crate::load_balancer::{strategy_from_name, LoadBalancer};

struct BackendGroup {
    backends: RwLock<Vec<Arc<Backend>>>,
    balancer: Box<dyn LoadBalancer>,
}

/// Registry of all upstream backends.
pub struct BackendRegistry {
    groups: DashMap<String, BackendGroup>,
    algorithm: String,
}

impl BackendRegistry {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            groups: DashMap::new(),
            algorithm: algorithm.into(),
        }
    }

    /// Build a registry from config, one group per distinct group name.
    pub fn from_config(backends: &[BackendConfig], algorithm: &str) -> Self {
        let registry = Self::new(algorithm);
        for config in backends {
            registry.register(config);
        }
        registry
    }

    /// Register a backend. Idempotent by address: an existing entry with
    /// identical parameters is untouched; a weight change is applied in
    /// place; a draining entry is revived.
    pub fn register(&self, config: &BackendConfig) {
        let addr: SocketAddr = match config.address.parse() {
            Ok(addr) => addr,
            Err(_) => {
                tracing::warn!(address = %config.address, "Invalid backend address, skipping");
                return;
            }
        };

        let group = self
            .groups
            .entry(config.group.clone())
            .or_insert_with(|| BackendGroup {
                backends: RwLock::new(Vec::new()),
                balancer: strategy_from_name(&self.algorithm),
            });

        let mut backends = group.backends.write().unwrap();
        if let Some(existing) = backends.iter().find(|b| b.addr == addr) {
            if existing.weight() != config.weight {
                tracing::info!(backend = %existing.name, addr = %addr, weight = config.weight, "Backend weight updated");
                existing.set_weight(config.weight);
            }
            if existing.status() == BackendStatus::Draining {
                tracing::info!(backend = %existing.name, addr = %addr, "Draining backend re-registered");
                existing.set_status(BackendStatus::Healthy);
            }
            return;
        }

        tracing::info!(backend = %config.name, addr = %addr, group = %config.group, "Backend registered");
        backends.push(Arc::new(Backend::new(
            config.name.clone(),
            addr,
            config.weight,
            config.max_connections,
        )));
    }

    /// Deregister a backend. With active connections it is marked draining
    /// and purged once the count reaches zero; otherwise removed now.
    pub fn deregister(&self, group: &str, addr: SocketAddr) {
        if let Some(entry) = self.groups.get(group) {
            let mut backends = entry.backends.write().unwrap();
            if let Some(backend) = backends.iter().find(|b| b.addr == addr) {
                if backend.active_count() > 0 {
                    tracing::info!(addr = %addr, group = %group, "Backend draining");
                    backend.set_status(BackendStatus::Draining);
                } else {
                    tracing::info!(addr = %addr, group = %group, "Backend removed");
                    backends.retain(|b| b.addr != addr);
                }
            }
        }
    }

    /// Set a backend's health status directly.
    pub fn mark_health(&self, addr: SocketAddr, status: BackendStatus) {
        for entry in self.groups.iter() {
            let backends = entry.backends.read().unwrap();
            if let Some(backend) = backends.iter().find(|b| b.addr == addr) {
                backend.set_status(status);
                return;
            }
        }
    }

    /// Consistent ordered snapshot of one group. Purges drained backends
    /// whose active count has reached zero.
    pub fn group_snapshot(&self, group: &str) -> Option<Vec<Arc<Backend>>> {
        let entry = self.groups.get(group)?;

        let needs_purge = {
            let backends = entry.backends.read().unwrap();
            backends
                .iter()
                .any(|b| b.status() == BackendStatus::Draining && b.active_count() == 0)
        };
        if needs_purge {
            let mut backends = entry.backends.write().unwrap();
            backends.retain(|b| {
                let purge = b.status() == BackendStatus::Draining && b.active_count() == 0;
                if purge {
                    tracing::info!(addr = %b.addr, group = %group, "Drained backend purged");
                }
                !purge
            });
        }

        let snapshot = entry.backends.read().unwrap().clone();
        Some(snapshot)
    }

    /// Snapshot of every backend across groups (for the prober).
    pub fn snapshot(&self) -> Vec<Arc<Backend>> {
        self.groups
            .iter()
            .flat_map(|entry| entry.backends.read().unwrap().clone())
            .collect()
    }

    /// Select a backend from a group, skipping excluded addresses.
    /// `None` means the group is unknown or has no healthy member left.
    pub fn select_excluding(
        &self,
        group: &str,
        exclude: &[SocketAddr],
    ) -> Option<Arc<Backend>> {
        let snapshot = self.group_snapshot(group)?;
        let candidates: Vec<Arc<Backend>> = snapshot
            .into_iter()
            .filter(|b| !exclude.contains(&b.addr))
            .collect();

        let entry = self.groups.get(group)?;
        entry.balancer.select(&candidates)
    }

    /// Select a backend from a group.
    pub fn select(&self, group: &str) -> Option<Arc<Backend>> {
        self.select_excluding(group, &[])
    }

    /// Reconcile against a reloaded backend list: register new or changed
    /// entries, drain the ones that disappeared.
    pub fn apply(&self, backends: &[BackendConfig]) {
        for config in backends {
            self.register(config);
        }

        let keep: Vec<(String, SocketAddr)> = backends
            .iter()
            .filter_map(|c| c.address.parse().ok().map(|addr| (c.group.clone(), addr)))
            .collect();

        let group_names: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        for group in group_names {
            let members: Vec<SocketAddr> = {
                let entry = match self.groups.get(&group) {
                    Some(e) => e,
                    None => continue,
                };
                let backends = entry.backends.read().unwrap();
                backends.iter().map(|b| b.addr).collect()
            };
            for addr in members {
                if !keep.iter().any(|(g, a)| *g == group && *a == addr) {
                    self.deregister(&group, addr);
                }
            }
        }

        self.groups.retain(|group, entry| {
            let empty = entry.backends.read().unwrap().is_empty();
            if empty {
                tracing::info!(group = %group, "Empty backend group removed");
            }
            !empty
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, group: &str, port: u16, weight: u32) -> BackendConfig {
        BackendConfig {
            name: name.into(),
            group: group.into(),
            address: format!("127.0.0.1:{port}"),
            weight,
            max_connections: 10,
        }
    }

    #[test]
    fn register_is_idempotent() {
        let registry = BackendRegistry::new("weighted");
        registry.register(&config("b1", "web", 9000, 2));
        registry.register(&config("b1", "web", 9000, 2));

        let snapshot = registry.group_snapshot("web").unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].weight(), 2);
    }

    #[test]
    fn reregister_updates_weight_in_place() {
        let registry = BackendRegistry::new("weighted");
        registry.register(&config("b1", "web", 9000, 1));
        let before = registry.group_snapshot("web").unwrap()[0].clone();

        registry.register(&config("b1", "web", 9000, 7));
        let after = registry.group_snapshot("web").unwrap()[0].clone();

        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.weight(), 7);
    }

    #[test]
    fn deregister_without_traffic_removes() {
        let registry = BackendRegistry::new("weighted");
        registry.register(&config("b1", "web", 9000, 1));
        registry.deregister("web", "127.0.0.1:9000".parse().unwrap());
        assert!(registry.group_snapshot("web").unwrap().is_empty());
    }

    #[test]
    fn deregister_with_traffic_drains_then_purges() {
        let registry = BackendRegistry::new("weighted");
        registry.register(&config("b1", "web", 9000, 1));
        let backend = registry.group_snapshot("web").unwrap()[0].clone();
        let guard = backend.track_active();

        registry.deregister("web", backend.addr);

        // Still present while the connection is in flight, but not selectable.
        let snapshot = registry.group_snapshot("web").unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status(), BackendStatus::Draining);
        assert!(registry.select("web").is_none());

        drop(guard);
        assert!(registry.group_snapshot("web").unwrap().is_empty());
    }

    #[test]
    fn select_skips_excluded_addresses() {
        let registry = BackendRegistry::new("weighted");
        registry.register(&config("b1", "web", 9000, 1));
        registry.register(&config("b2", "web", 9001, 1));

        let excluded: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        for _ in 0..10 {
            let picked = registry.select_excluding("web", &[excluded]).unwrap();
            assert_ne!(picked.addr, excluded);
        }
    }

    #[test]
    fn mark_health_is_visible_to_selection() {
        let registry = BackendRegistry::new("weighted");
        registry.register(&config("b1", "web", 9000, 1));
        registry.mark_health("127.0.0.1:9000".parse().unwrap(), BackendStatus::Down);
        assert!(registry.select("web").is_none());
    }

    #[test]
    fn unknown_group_yields_none() {
        let registry = BackendRegistry::new("weighted");
        assert!(registry.select("nope").is_none());
        assert!(registry.group_snapshot("nope").is_none());
    }

    #[test]
    fn apply_reconciles_added_and_removed() {
        let registry = BackendRegistry::new("weighted");
        registry.apply(&[config("b1", "web", 9000, 1), config("b2", "web", 9001, 1)]);
        assert_eq!(registry.group_snapshot("web").unwrap().len(), 2);

        registry.apply(&[config("b2", "web", 9001, 1), config("c1", "api", 9100, 1)]);
        let web = registry.group_snapshot("web").unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].addr, "127.0.0.1:9001".parse::<SocketAddr>().unwrap());
        assert_eq!(registry.group_snapshot("api").unwrap().len(), 1);
    }
}
