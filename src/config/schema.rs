//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Route definitions mapping requests to backend groups.
    pub routes: Vec<RouteConfig>,

    /// Backend server definitions.
    pub backends: Vec<BackendConfig>,

    /// Active health probing settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Upstream connection pool settings.
    pub pool: PoolConfig,

    /// Load balancing strategy.
    pub load_balancing: LoadBalancingConfig,

    /// Request-path resource limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3333".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Route configuration mapping requests to backend groups.
///
/// Routes are evaluated in file order; the first match wins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact, case-insensitive).
    pub host: Option<String>,

    /// Path prefix to match (case-sensitive).
    pub path_prefix: Option<String>,

    /// Methods to match (any if empty).
    #[serde(default)]
    pub methods: Vec<String>,

    /// Backend group name to forward to.
    pub backend_group: String,

    /// Optional regex rewrite applied to the request path before forwarding.
    pub rewrite: Option<RewriteConfig>,

    /// Per-header forwarding policy. The key "$default" sets the fallback
    /// for headers not listed; the fallback is passthrough if unset.
    #[serde(default)]
    pub headers: HashMap<String, HeaderActionConfig>,
}

/// Regex path rewrite.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteConfig {
    /// Pattern matched against the request path and query.
    pub r#match: String,

    /// Replacement, with $1-style capture references.
    pub replace: String,
}

/// Forwarding policy for one request header.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum HeaderActionConfig {
    /// Rewrite the value; a non-matching value rejects the request.
    Replace { r#match: String, replace: String },

    /// "passthrough" or "ignore".
    Named(String),
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub name: String,

    /// Backend group this server belongs to.
    pub group: String,

    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Maximum concurrent upstream connections to this backend.
    #[serde(default = "default_max_backend_conns")]
    pub max_connections: usize,
}

fn default_weight() -> u32 {
    1
}

fn default_max_backend_conns() -> usize {
    100
}

/// Active health probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health probes.
    pub enabled: bool,

    /// Probe interval per backend in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// Path probed with an HTTP GET.
    pub path: String,

    /// Consecutive failures before marking a backend down.
    pub unhealthy_threshold: u32,

    /// Consecutive successes before marking a backend healthy again.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request deadline (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Idle pooled connection freshness threshold in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            idle_secs: 60,
        }
    }
}

/// Upstream connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// How long an acquire may wait for a free slot, in milliseconds.
    pub acquire_timeout_ms: u64,

    /// Maximum idle connections retained per backend.
    pub max_idle_per_backend: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 1_000,
            max_idle_per_backend: 32,
        }
    }
}

/// Load balancing strategy selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancingConfig {
    /// "weighted", "round_robin" or "least_connections".
    pub algorithm: String,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            algorithm: "weighted".to_string(),
        }
    }
}

/// Request-path resource limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request/response body size in bytes.
    pub max_body_bytes: usize,

    /// Alternate-backend attempts after the first failure (bounded retry).
    pub retry_alternates: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024,
            retry_alternates: 1,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
