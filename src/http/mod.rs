//! HTTP plumbing subsystem.
//!
//! # Data Flow
//! ```text
//! Member or proxy router
//!     → cors.rs (client-facing routers only)
//!     → server.rs (timeout, request ID, tracing)
//!     → net::serve (one task per listener)
//! ```

pub mod cors;
pub mod request;
pub mod server;

pub use cors::with_cors;
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::layered;
