//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Data dir mode → Initial membership → Member or proxy → Listeners serving
//!     (member failing on a full discovery cluster → proxy, when allowed)
//!
//! Shutdown (interrupt.rs):
//!     Signal or explicit stop → Handlers in registration order → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger the interrupt registry
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then membership, then listeners
//! - Ordered shutdown: handlers run exactly once, in registration order
//! - Exit waits for a running handler pass to finish

pub mod interrupt;
pub mod signals;
pub mod startup;

pub use interrupt::{InterruptHandler, InterruptRegistry};
pub use startup::{Bootstrap, BootstrapError, BootstrapState, Collaborators, Fault, RunMode, Running};
