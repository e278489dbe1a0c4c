//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `proxy_request_bytes_total` / `proxy_response_bytes_total` (counters)
//! - `proxy_active_connections` (gauge): current client connections
//! - `proxy_backend_health` (gauge): 1=selectable, 0=not
//! - `proxy_health_transitions_total` (counter): by backend and new state
//! - `proxy_pool_exhausted_total` (counter): acquires that hit the cap
//! - `proxy_upstream_connects_total` (counter): fresh upstream dials
//!
//! # Design Decisions
//! - The `metrics` facade keeps call sites cheap; the Prometheus exporter
//!   is installed only when enabled in config
//! - Labels stay low-cardinality: route and backend names, not paths

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::load_balancer::backend::BackendStatus;

/// Install the Prometheus exporter and register metric descriptions.
pub fn init_metrics(addr: SocketAddr) {
    if let Err(e) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
        return;
    }

    describe_counter!("proxy_requests_total", "Completed requests");
    describe_histogram!(
        "proxy_request_duration_seconds",
        "End-to-end request latency"
    );
    describe_counter!("proxy_request_bytes_total", "Bytes forwarded to backends");
    describe_counter!("proxy_response_bytes_total", "Bytes relayed to clients");
    describe_gauge!("proxy_active_connections", "Open client connections");
    describe_gauge!("proxy_backend_health", "Backend selectability (1 or 0)");
    describe_counter!("proxy_health_transitions_total", "Health state changes");
    describe_counter!("proxy_pool_exhausted_total", "Pool acquires that timed out");
    describe_counter!("proxy_upstream_connects_total", "Fresh upstream connections");

    tracing::info!(address = %addr, "Metrics exporter listening");
}

/// Record one completed (or failed) request.
pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string(),
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record relayed byte counts for one request.
pub fn record_transfer(backend: &str, request_bytes: u64, response_bytes: u64) {
    counter!("proxy_request_bytes_total", "backend" => backend.to_string())
        .increment(request_bytes);
    counter!("proxy_response_bytes_total", "backend" => backend.to_string())
        .increment(response_bytes);
}

pub fn record_backend_health(backend: &str, selectable: bool) {
    gauge!("proxy_backend_health", "backend" => backend.to_string())
        .set(if selectable { 1.0 } else { 0.0 });
}

pub fn record_health_transition(backend: &str, status: BackendStatus) {
    let state = match status {
        BackendStatus::Healthy => "healthy",
        BackendStatus::Draining => "draining",
        BackendStatus::Down => "down",
    };
    counter!(
        "proxy_health_transitions_total",
        "backend" => backend.to_string(),
        "state" => state,
    )
    .increment(1);
}

pub fn record_pool_exhausted(backend: &str) {
    counter!("proxy_pool_exhausted_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_upstream_connect(backend: &str) {
    counter!("proxy_upstream_connects_total", "backend" => backend.to_string()).increment(1);
}

pub fn connection_opened() {
    gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("proxy_active_connections").decrement(1.0);
}
