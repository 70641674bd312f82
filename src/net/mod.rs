//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured listen URLs
//!     → listener.rs (bind in order, TLS acceptor for https, rollback on failure)
//!     → serve.rs (one supervised serving task per listener)
//!     → Hand off to the member or proxy router
//!
//! Outbound:
//!     transport.rs (reqwest client with optional CA root)
//! ```
//!
//! # Design Decisions
//! - Listeners are all-or-nothing per role
//! - Closing is driven only by the interrupt registry
//! - TLS is optional and handled transparently

pub mod listener;
pub mod serve;
pub mod tls;
pub mod transport;

pub use listener::{ListenerError, ListenerHandle, ListenerSet, Role};
pub use serve::{ServeExit, ServeGroup};
