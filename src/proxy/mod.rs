//! Proxy mode.
//!
//! # Data Flow
//! ```text
//! Client request
//!     → handler.rs (read-only guard, buffer body)
//!     → director.rs (round-robin over client URLs, skip failed ones)
//!     → member client URL
//!
//! Background:
//!     refresher.rs → query.rs (GET <peer>/members)
//!                  → cluster_file.rs (<dir>/proxy/cluster)
//!                  → publishes client URLs to the director
//! ```

pub mod cluster_file;
pub mod director;
pub mod handler;
pub mod query;
pub mod refresher;

pub use cluster_file::{ClusterFile, ClusterRecord, PersistError};
pub use director::Director;
pub use handler::ProxyState;
pub use query::{ClusterQuery, HttpClusterQuery, QueryError, RemoteCluster, RemoteMember};
pub use refresher::ProxyMembershipRefresher;
