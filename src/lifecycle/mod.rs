//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Logging → Metrics exporter → Caller → Health endpoint
//!
//! Shutdown (shutdown.rs):
//!     Signal received (signals.rs) → token cancelled → in-flight calls abort,
//!     health endpoint drains → exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
