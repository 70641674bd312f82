//! Built-in member server.
//!
//! # Responsibilities
//! - Join the discovery service when bootstrapping a new cluster through it
//! - Check this member is part of the initial cluster
//! - Create the `member` directory that marks the data directory as a member
//! - Serve `/members`, `/health` and `/version` on peer and client routers

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;

use crate::cluster::discovery::Discovery;
use crate::cluster::urls::{NodeUrl, PeerUrlMap};
use crate::member::{MemberConfig, MemberError, MemberServer, MemberServerFactory};
use crate::proxy::query::{RemoteCluster, RemoteMember};

/// A member that serves its view of the initial cluster.
pub struct LocalMember {
    config: MemberConfig,
    members: PeerUrlMap,
    started: AtomicBool,
    stopped: watch::Sender<bool>,
}

#[derive(Clone)]
struct MemberState {
    member: Arc<LocalMember>,
}

#[derive(Debug, Serialize)]
struct Health {
    health: &'static str,
}

#[derive(Debug, Serialize)]
struct Version {
    server: &'static str,
    cluster: String,
}

impl LocalMember {
    fn new(config: MemberConfig, members: PeerUrlMap) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            config,
            members,
            started: AtomicBool::new(false),
            stopped,
        }
    }

    fn cluster(&self) -> RemoteCluster {
        let members = self
            .members
            .iter()
            .map(|(name, peer_urls)| RemoteMember {
                name: name.to_string(),
                peer_urls: peer_urls.iter().map(NodeUrl::to_string).collect(),
                client_urls: if name == self.config.name {
                    self.config.client_urls.iter().map(NodeUrl::to_string).collect()
                } else {
                    Vec::new()
                },
            })
            .collect();
        RemoteCluster { members }
    }

    fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/members", get(members_handler))
            .route("/health", get(health_handler))
            .route("/version", get(version_handler))
            .with_state(MemberState {
                member: self.clone(),
            })
    }
}

async fn members_handler(State(state): State<MemberState>) -> Json<RemoteCluster> {
    Json(state.member.cluster())
}

async fn health_handler(State(state): State<MemberState>) -> Json<Health> {
    let stopped = *state.member.stopped.borrow();
    Json(Health {
        health: if stopped { "false" } else { "true" },
    })
}

async fn version_handler(State(state): State<MemberState>) -> Json<Version> {
    Json(Version {
        server: env!("CARGO_PKG_VERSION"),
        cluster: state.member.config.token.clone(),
    })
}

/// Shared handle returned to the orchestrator.
struct LocalMemberHandle(Arc<LocalMember>);

impl MemberServer for LocalMemberHandle {
    fn start(&self) {
        if self.0.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            name = %self.0.config.name,
            cluster = %self.0.members,
            election_ticks = self.0.config.election_ticks,
            tick = ?self.0.config.tick,
            "Member started"
        );
    }

    fn stop(&self) {
        if self.0.stopped.send_replace(true) {
            return;
        }
        tracing::info!(name = %self.0.config.name, "Member stopped");
    }

    fn stop_notify(&self) -> watch::Receiver<bool> {
        self.0.stopped.subscribe()
    }

    fn peer_router(&self) -> Router {
        self.0.router()
    }

    fn client_router(&self) -> Router {
        self.0.router()
    }
}

/// Builds [`LocalMember`]s.
pub struct LocalMemberFactory {
    discovery: Arc<dyn Discovery>,
}

impl LocalMemberFactory {
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self { discovery }
    }

    async fn initial_members(&self, config: &MemberConfig) -> Result<PeerUrlMap, MemberError> {
        match &config.discovery_url {
            Some(durl) if config.new_cluster => {
                let cluster = self
                    .discovery
                    .join_cluster(
                        durl,
                        config.discovery_proxy.as_deref(),
                        &config.name,
                        &config.peer_urls,
                    )
                    .await?;
                PeerUrlMap::parse(&cluster).map_err(MemberError::Cluster)
            }
            _ => Ok(config.initial_peers.clone()),
        }
    }
}

#[async_trait]
impl MemberServerFactory for LocalMemberFactory {
    async fn create(&self, config: MemberConfig) -> Result<Arc<dyn MemberServer>, MemberError> {
        let members = if config.force_new_cluster {
            PeerUrlMap::single(config.name.clone(), config.peer_urls.clone())
        } else {
            self.initial_members(&config).await?
        };

        if members.get(&config.name).is_none() {
            return Err(MemberError::NotInCluster {
                name: config.name.clone(),
                cluster: members.to_string(),
            });
        }

        let member_dir = config.member_dir();
        create_private_dir(&member_dir).map_err(|source| MemberError::DataDir {
            path: member_dir.clone(),
            source,
        })?;

        tracing::info!(
            name = %config.name,
            data_dir = %config.data_dir.display(),
            snap_count = config.snap_count,
            max_snap_files = config.max_snap_files,
            max_wal_files = config.max_wal_files,
            new_cluster = config.new_cluster,
            "Member configured"
        );

        Ok(Arc::new(LocalMemberHandle(Arc::new(LocalMember::new(config, members)))))
    }
}

/// Create a directory (and parents) readable only by the owner.
pub(crate) fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}
