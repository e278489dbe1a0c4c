//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request path and background tasks
//!     → tracing events (structured fields, request ids)
//!     → metrics.rs (counters, gauges, histograms)
//!     → Prometheus exporter (optional, separate listener)
//! ```
//!
//! # Design Decisions
//! - The core emits events; formatting and export live at the edges
//! - Metric updates are cheap enough for the hot path
//! - Client responses never carry internal detail; the sink gets it all

pub mod logging;
pub mod metrics;
