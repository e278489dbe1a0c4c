//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, method)
//!     → router.rs (ordered rule table lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched Route or no match
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Compile matchers and rewrite/header patterns
//!     → Freeze as immutable RuleTable
//!     → Atomic swap into the shared Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled once, immutable at runtime
//! - Deterministic: same input always matches same route
//! - First match wins, in config-file order
//! - Regex runs only after a match (rewrites), never in the match path

pub mod matcher;
pub mod router;

pub use router::{HeaderAction, Route, Router, RuleTable};
