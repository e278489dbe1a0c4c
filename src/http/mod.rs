//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net layer)
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request id)
//!     → proxy engine (route, select, forward)
//!     → response.rs (hop-by-hop stripping, error mapping)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use server::HttpServer;
