//! Cluster identity: data-directory mode, URLs, discovery and initial membership.

pub mod discovery;
pub mod membership;
pub mod mode;
pub mod urls;

pub use discovery::{Discovery, DiscoveryError, HttpDiscovery};
pub use membership::{InitialMembership, MembershipError, MembershipSource};
pub use mode::{DirState, ModeError};
pub use urls::{NodeUrl, PeerUrlMap, UrlError};
