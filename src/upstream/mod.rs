//! Upstream connection management subsystem.
//!
//! # Data Flow
//! ```text
//! Engine needs a backend connection
//!     → pool.rs acquire (slot permit, bounded wait)
//!     → reuse a fresh idle transport, or dial + HTTP/1.1 handshake
//!     → connection.rs (in-use handle, RAII accounting)
//!     → exchange completes
//!     → release: back to the idle list, or discarded
//! ```
//!
//! # Design Decisions
//! - Pools are keyed per backend address; no slot is shared across backends
//! - A connection is never lent to two requests at once
//! - Stale idle transports are evicted lazily on the next acquire, not by
//!   a background sweep
//! - Dropping an in-use handle always returns the slot and the backend's
//!   active count, so cancellation cannot leak either

pub mod connection;
pub mod pool;

pub use connection::PooledConnection;
pub use pool::{AcquireError, ConnectionPool, PoolOptions};
