//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection cap)
//!     → connection.rs (id, active tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accepts prevent resource exhaustion; excess queues
//! - Each connection is tracked for the active gauge and drain
//! - Response order within one client connection follows request order
//!   (HTTP/1.1 serialization)

pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::Listener;
