//! Proxy engine subsystem.
//!
//! # Data Flow
//! ```text
//! Request accepted by the HTTP layer
//!     → engine.rs drives the per-request state machine:
//!         ACCEPTED → ROUTED → BACKEND_SELECTED → CONNECTED
//!                  → FORWARDING → RELAYING → DONE
//!       (ERROR reachable from every non-DONE state)
//!     → relay.rs streams the response, counts bytes, recycles the
//!       upstream connection on completion
//! ```
//!
//! # Design Decisions
//! - One task per in-flight request; no shared mutable request state
//! - Bounded alternate-backend retry with an explicit attempt counter,
//!   no backoff, so tail latency stays predictable
//! - Every stage runs under the request deadline; expiry discards any
//!   held upstream connection
//! - Protocol specifics stay at the relay seam

pub mod engine;
pub mod relay;

pub use engine::{EngineOptions, ProxyEngine, RequestState};
pub use relay::ByteCounters;
