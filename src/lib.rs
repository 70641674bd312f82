//! Cluster node bootstrap and lifecycle.
//!
//! A node starts either as a cluster member or as a proxy forwarding client
//! traffic to the members, decided by configuration and by what an earlier run
//! left in the data directory.

// Node identity and membership
pub mod cluster;
pub mod config;
pub mod member;
pub mod proxy;

// Serving
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::NodeConfig;
pub use lifecycle::{Bootstrap, BootstrapError, Collaborators, InterruptRegistry, Running};
