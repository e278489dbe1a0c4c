//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Initialize subsystems → Start listener
//!     Any startup error is fatal before traffic is accepted
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain in-flight → Exit
//!     Repeated signal → immediate exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//!     SIGHUP → config reload
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
