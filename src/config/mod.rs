//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On reload (file change or SIGHUP):
//!     watcher.rs / signals.rs load the new config
//!     → validation.rs validates
//!     → rule table swapped atomically, registry reconciled
//!     → in-flight requests keep the snapshot they started with
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A rejected reload never disturbs the running configuration

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::BackendConfig;
pub use schema::ListenerConfig;
pub use schema::ProxyConfig;
pub use schema::RouteConfig;
