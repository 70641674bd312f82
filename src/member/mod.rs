//! Member server boundary.
//!
//! The orchestrator hands a [`MemberConfig`] to a [`MemberServerFactory`] and
//! gets back a running [`MemberServer`]: something that owns the member's data
//! directory, talks to peers over the shared transport and exposes a peer and a
//! client router for the listeners opened on its behalf.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use thiserror::Error;
use tokio::sync::watch;

use crate::cluster::discovery::DiscoveryError;
use crate::cluster::urls::{NodeUrl, PeerUrlMap, UrlError};

pub mod local;

pub use local::{LocalMember, LocalMemberFactory};

/// Everything a member server needs to start.
#[derive(Debug, Clone)]
pub struct MemberConfig {
    pub name: String,
    pub client_urls: Vec<NodeUrl>,
    pub peer_urls: Vec<NodeUrl>,
    pub data_dir: PathBuf,
    pub snap_count: u64,
    pub max_snap_files: u32,
    pub max_wal_files: u32,
    pub initial_peers: PeerUrlMap,
    pub token: String,
    pub discovery_url: Option<String>,
    pub discovery_proxy: Option<String>,
    pub new_cluster: bool,
    pub force_new_cluster: bool,
    /// Shared outbound client for peer traffic.
    pub transport: reqwest::Client,
    pub tick: Duration,
    pub election_ticks: u64,
}

impl MemberConfig {
    /// Directory holding the member's own state.
    pub fn member_dir(&self) -> PathBuf {
        self.data_dir.join(crate::cluster::mode::MEMBER_MARKER)
    }
}

#[derive(Debug, Error)]
pub enum MemberError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("cannot parse cluster returned by discovery: {0}")]
    Cluster(#[source] UrlError),

    #[error("member {name} not found in initial cluster {cluster}")]
    NotInCluster { name: String, cluster: String },

    #[error("cannot access member directory {path:?}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A running member.
pub trait MemberServer: Send + Sync {
    fn start(&self);

    /// Stop serving. Called from the interrupt handler pass.
    fn stop(&self);

    /// Flips to `true` once the member has stopped.
    fn stop_notify(&self) -> watch::Receiver<bool>;

    fn peer_router(&self) -> Router;

    fn client_router(&self) -> Router;
}

/// Builds member servers.
#[async_trait]
pub trait MemberServerFactory: Send + Sync {
    async fn create(&self, config: MemberConfig) -> Result<Arc<dyn MemberServer>, MemberError>;
}
