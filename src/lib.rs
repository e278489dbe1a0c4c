//! reproxy: a regex-rewriting reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                  REPROXY                     │
//!                    │                                              │
//!  Client Request    │  ┌─────────┐   ┌────────┐   ┌────────────┐  │
//!  ──────────────────┼─▶│   net   │──▶│  http  │──▶│  routing   │  │
//!                    │  │listener │   │ server │   │ rule table │  │
//!                    │  └─────────┘   └────────┘   └─────┬──────┘  │
//!                    │                                   ▼         │
//!                    │                           ┌──────────────┐  │
//!                    │                           │load_balancer │  │
//!                    │                           │  + registry  │  │
//!                    │                           └─────┬────────┘  │
//!                    │                                 ▼           │
//!  Client Response   │  ┌─────────┐   ┌────────┐  ┌──────────┐    │
//!  ◀─────────────────┼──│  relay  │◀──│ engine │◀─│ upstream │◀───┼── Backend
//!                    │  └─────────┘   └────────┘  │   pool   │    │
//!                    │                            └──────────┘    │
//!                    │  ┌────────────────────────────────────────┐ │
//!                    │  │ config · health · lifecycle ·          │ │
//!                    │  │ observability                          │ │
//!                    │  └────────────────────────────────────────┘ │
//!                    └──────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod proxy;
pub mod routing;
pub mod upstream;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use net::Listener;
