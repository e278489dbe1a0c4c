//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active probes (active.rs):
//!     Per-backend timer (jittered)
//!     → Probe over an ephemeral connection
//!     → mark_success / mark_failure on the backend
//!
//! Passive signals:
//!     Upstream connect or 5xx observed by the engine
//!     → Same hysteresis counters
//!
//! Hysteresis (on Backend):
//!     Healthy → Down after K consecutive failures
//!     Down → Healthy after M consecutive successes
//! ```
//!
//! # Design Decisions
//! - Active and passive signals feed one state machine
//! - Thresholded transitions prevent flapping
//! - Draining backends are neither probed nor transitioned

pub mod active;

pub use active::HealthMonitor;
