//! Startup orchestration.
//!
//! # Responsibilities
//! - Decide between member and proxy mode from configuration and the data
//!   directory
//! - Resolve the initial membership
//! - Open listeners, start the member server or the proxy, start serving
//! - Register every shutdown action with the interrupt registry
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, except a full discovery cluster
//!   when fallback to proxy is allowed
//! - Listeners open before the server that uses them and are closed again if
//!   anything later fails (listener sets close on drop)
//! - Listeners start serving last (traffic only when ready)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::cluster::discovery::{Discovery, DiscoveryError, HttpDiscovery};
use crate::cluster::membership::{self, InitialMembership, MembershipError};
use crate::cluster::mode::{resolve_dir_state, DirState, ModeError, PROXY_MARKER};
use crate::cluster::urls::{PeerUrlMap, UrlError};
use crate::config::NodeConfig;
use crate::http::{layered, with_cors};
use crate::lifecycle::interrupt::InterruptRegistry;
use crate::member::local::create_private_dir;
use crate::member::{LocalMemberFactory, MemberConfig, MemberError, MemberServerFactory};
use crate::net::listener::{ListenerError, ListenerSet, Role};
use crate::net::serve::ServeGroup;
use crate::net::transport::{build_client, TransportError};
use crate::proxy::handler::{self, ProxyState};
use crate::proxy::{
    ClusterFile, ClusterQuery, Director, HttpClusterQuery, PersistError, ProxyMembershipRefresher,
};

/// How long serving tasks get to wind down after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Where a node is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Init,
    ModeDetermined,
    MembershipResolved,
    MemberStarting,
    ProxyStarting,
    Running,
    ShuttingDown,
    Terminated,
}

/// What the node ended up running as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Member,
    Proxy,
}

/// Broad class of a startup failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Configuration,
    Discovery,
    ResourceAcquisition,
    Persistence,
    Serving,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid listen URLs: {0}")]
    Url(#[from] UrlError),

    #[error(transparent)]
    Mode(#[from] ModeError),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Member(#[from] MemberError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("cannot create {path:?}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("every listener stopped serving unexpectedly")]
    ServingFailed,
}

impl BootstrapError {
    fn discovery_error(&self) -> Option<&DiscoveryError> {
        match self {
            BootstrapError::Discovery(e) => Some(e),
            BootstrapError::Membership(MembershipError::Discovery(e)) => Some(e),
            BootstrapError::Member(MemberError::Discovery(e)) => Some(e),
            _ => None,
        }
    }

    pub fn is_cluster_full(&self) -> bool {
        matches!(self.discovery_error(), Some(DiscoveryError::FullCluster))
    }

    pub fn is_duplicate_id(&self) -> bool {
        matches!(self.discovery_error(), Some(DiscoveryError::DuplicateId))
    }

    pub fn fault(&self) -> Fault {
        if self.discovery_error().is_some() {
            return Fault::Discovery;
        }
        match self {
            BootstrapError::Url(_)
            | BootstrapError::Mode(_)
            | BootstrapError::Membership(_)
            | BootstrapError::Member(_) => Fault::Configuration,
            BootstrapError::Listener(_)
            | BootstrapError::Transport(_)
            | BootstrapError::DataDir { .. } => Fault::ResourceAcquisition,
            BootstrapError::Persist(_) => Fault::Persistence,
            BootstrapError::Discovery(_) => Fault::Discovery,
            BootstrapError::ServingFailed => Fault::Serving,
        }
    }
}

/// External collaborators of the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub discovery: Arc<dyn Discovery>,
    pub members: Arc<dyn MemberServerFactory>,
    /// Membership query for the proxy. Defaults to HTTP over the peer transport.
    pub query: Option<Arc<dyn ClusterQuery>>,
}

impl Collaborators {
    /// HTTP discovery, the built-in member and HTTP membership queries.
    pub fn standard() -> Self {
        let discovery: Arc<dyn Discovery> = Arc::new(HttpDiscovery::default());
        Self {
            members: Arc::new(LocalMemberFactory::new(discovery.clone())),
            discovery,
            query: None,
        }
    }
}

/// Brings a node up in member or proxy mode.
pub struct Bootstrap {
    config: NodeConfig,
    registry: Arc<InterruptRegistry>,
    collaborators: Collaborators,
    state: watch::Sender<BootstrapState>,
}

impl Bootstrap {
    pub fn new(config: NodeConfig, registry: Arc<InterruptRegistry>, collaborators: Collaborators) -> Self {
        let (state, _) = watch::channel(BootstrapState::Init);
        Self {
            config,
            registry,
            collaborators,
            state,
        }
    }

    pub fn state(&self) -> BootstrapState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: BootstrapState) {
        tracing::debug!(?state, "Bootstrap state");
        self.state.send_replace(state);
    }

    /// Start the node. Returns once every listener is serving.
    pub async fn start(self) -> Result<Running, BootstrapError> {
        let data_dir = self.config.data_dir();
        if self.config.data_dir.is_none() {
            tracing::info!(data_dir = %data_dir.display(), "No data dir provided, using default");
        }

        let dir_state = resolve_dir_state(&data_dir)?;
        self.set_state(BootstrapState::ModeDetermined);
        if dir_state != DirState::Empty {
            tracing::info!(
                mode = %dir_state,
                "The server is already initialized, starting in the same mode"
            );
        }

        let membership = membership::resolve(&self.config, self.collaborators.discovery.as_ref()).await?;
        self.set_state(BootstrapState::MembershipResolved);
        tracing::info!(
            source = ?membership.source,
            cluster = %membership.peers,
            "Resolved initial membership"
        );

        let running = if self.config.is_proxy() || dir_state == DirState::Proxy {
            self.start_proxy(&data_dir, membership.peers).await?
        } else {
            match self.start_member(&data_dir, &membership).await {
                Ok(running) => running,
                Err(e) if e.is_cluster_full() && self.config.should_fallback_to_proxy() => {
                    tracing::warn!(error = %e, "Discovery cluster full, falling back to proxy");
                    self.start_proxy(&data_dir, membership.peers).await?
                }
                Err(e) => return Err(e),
            }
        };

        self.set_state(BootstrapState::Running);
        Ok(running)
    }

    async fn start_member(
        &self,
        data_dir: &Path,
        membership: &InitialMembership,
    ) -> Result<Running, BootstrapError> {
        self.set_state(BootstrapState::MemberStarting);
        let config = &self.config;

        let peers = ListenerSet::open(&config.listen_peer_urls()?, Role::Peer, &config.peer_tls).await?;
        let clients =
            ListenerSet::open(&config.listen_client_urls()?, Role::Client, &config.client_tls).await?;

        let transport = build_client(&config.peer_tls, &config.timeouts)?;
        let member_config = MemberConfig {
            name: config.name.clone(),
            client_urls: config.advertise_client_urls()?,
            peer_urls: config.advertise_peer_urls()?,
            data_dir: data_dir.to_path_buf(),
            snap_count: config.storage.snap_count,
            max_snap_files: config.storage.max_snap_files,
            max_wal_files: config.storage.max_wal_files,
            initial_peers: membership.peers.clone(),
            token: membership.token.clone(),
            discovery_url: config.cluster.discovery.clone(),
            discovery_proxy: config.cluster.discovery_proxy.clone(),
            new_cluster: config.is_new_cluster(),
            force_new_cluster: config.cluster.force_new,
            transport,
            tick: Duration::from_millis(config.raft.heartbeat_ms),
            election_ticks: config.election_ticks(),
        };
        let server = self.collaborators.members.create(member_config).await?;

        server.start();
        let stopping = server.clone();
        self.registry.register(Box::new(move || stopping.stop()));

        let peer_addrs = peers.local_addrs();
        let client_addrs = clients.local_addrs();
        let mut group = ServeGroup::new();

        let peer_router = layered(server.peer_router(), config.timeouts.peer_request());
        for handle in peers.into_handles() {
            group.spawn(handle, peer_router.clone());
        }
        let client_router = layered(
            with_cors(server.client_router(), &config.cors),
            config.timeouts.request(),
        );
        for handle in clients.into_handles() {
            group.spawn(handle, client_router.clone());
        }
        self.registry.register(group.closer());

        tracing::info!(name = %config.name, "Member ready to serve");
        Ok(Running {
            mode: RunMode::Member,
            group,
            registry: self.registry.clone(),
            member_stopped: Some(server.stop_notify()),
            state: self.state.clone(),
            peer_addrs,
            client_addrs,
            refresher: None,
        })
    }

    async fn start_proxy(&self, data_dir: &Path, peers: PeerUrlMap) -> Result<Running, BootstrapError> {
        self.set_state(BootstrapState::ProxyStarting);
        let config = &self.config;

        let peers = match &config.cluster.discovery {
            Some(durl) => {
                let cluster = self
                    .collaborators
                    .discovery
                    .get_cluster(durl, config.cluster.discovery_proxy.as_deref())
                    .await?;
                PeerUrlMap::parse(&cluster).map_err(MembershipError::Parse)?
            }
            None => peers,
        };

        let proxy_dir = data_dir.join(PROXY_MARKER);
        create_private_dir(&proxy_dir).map_err(|source| BootstrapError::DataDir {
            path: proxy_dir.clone(),
            source,
        })?;

        // Membership is read from peers, requests are forwarded to clients.
        let peer_transport = build_client(&config.peer_tls, &config.timeouts)?;
        let client_transport = build_client(&config.client_tls, &config.timeouts)?;
        let query = self
            .collaborators
            .query
            .clone()
            .unwrap_or_else(|| Arc::new(HttpClusterQuery::new(peer_transport)) as Arc<dyn ClusterQuery>);
        let refresher = Arc::new(ProxyMembershipRefresher::seeded(
            query,
            ClusterFile::new(&proxy_dir),
            &peers,
        )?);

        let clients =
            ListenerSet::open(&config.listen_client_urls()?, Role::Client, &config.client_tls).await?;

        let director = Arc::new(Director::new(
            refresher.clone(),
            config.proxy.endpoint_failure_wait(),
        ));
        let state = ProxyState {
            director,
            client: client_transport,
            max_body_bytes: config.proxy.max_body_bytes,
        };
        let router = layered(
            with_cors(handler::router(state, config.is_readonly_proxy()), &config.cors),
            config.timeouts.request(),
        );

        let (stop_refresh, refresh_stopped) = watch::channel(false);
        tokio::spawn(refresher.clone().run(config.proxy.refresh_interval(), refresh_stopped));
        self.registry.register(Box::new(move || {
            stop_refresh.send_replace(true);
        }));

        let client_addrs = clients.local_addrs();
        let mut group = ServeGroup::new();
        for handle in clients.into_handles() {
            group.spawn(handle, router.clone());
        }
        self.registry.register(group.closer());

        tracing::info!(readonly = config.is_readonly_proxy(), "Proxy ready to serve");
        Ok(Running {
            mode: RunMode::Proxy,
            group,
            registry: self.registry.clone(),
            member_stopped: None,
            state: self.state.clone(),
            peer_addrs: Vec::new(),
            client_addrs,
            refresher: Some(refresher),
        })
    }
}

/// A node that is serving.
pub struct Running {
    mode: RunMode,
    group: ServeGroup,
    registry: Arc<InterruptRegistry>,
    member_stopped: Option<watch::Receiver<bool>>,
    state: watch::Sender<BootstrapState>,
    peer_addrs: Vec<SocketAddr>,
    client_addrs: Vec<SocketAddr>,
    refresher: Option<Arc<ProxyMembershipRefresher>>,
}

impl Running {
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn peer_addrs(&self) -> &[SocketAddr] {
        &self.peer_addrs
    }

    pub fn client_addrs(&self) -> &[SocketAddr] {
        &self.client_addrs
    }

    pub fn refresher(&self) -> Option<&Arc<ProxyMembershipRefresher>> {
        self.refresher.as_ref()
    }

    /// Block until the registry has run its handlers or the member stopped.
    pub async fn wait(mut self) -> Result<(), BootstrapError> {
        let total = self.group.len();
        let mut failed = 0;
        let mut member_stopped = self.member_stopped.take();
        let registry = self.registry.clone();

        loop {
            tokio::select! {
                _ = registry.stopped() => break,
                _ = stopped(&mut member_stopped) => {
                    tracing::info!("Member server stopped");
                    break;
                }
                exit = self.group.next_exit() => {
                    let Some(exit) = exit else { break };
                    if exit.expected {
                        continue;
                    }
                    failed += 1;
                    tracing::error!(
                        url = %exit.url,
                        role = %exit.role,
                        result = ?exit.result,
                        "Listener stopped serving unexpectedly"
                    );
                    if failed == total {
                        self.shutdown().await;
                        return Err(BootstrapError::ServingFailed);
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.state.send_replace(BootstrapState::ShuttingDown);
        let registry = self.registry.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || registry.stop()).await {
            tracing::error!(error = %e, "Interrupt handlers panicked");
        }

        while let Ok(Some(exit)) = tokio::time::timeout(SHUTDOWN_GRACE, self.group.next_exit()).await {
            tracing::debug!(url = %exit.url, role = %exit.role, "Listener closed");
        }
        self.state.send_replace(BootstrapState::Terminated);
    }
}

async fn stopped(member: &mut Option<watch::Receiver<bool>>) {
    match member {
        Some(rx) => {
            if rx.wait_for(|stopped| *stopped).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_discovery_failures_wherever_they_surface() {
        let err = BootstrapError::Member(MemberError::Discovery(DiscoveryError::FullCluster));
        assert!(err.is_cluster_full());
        assert_eq!(err.fault(), Fault::Discovery);

        let err = BootstrapError::Discovery(DiscoveryError::DuplicateId);
        assert!(err.is_duplicate_id());
        assert!(!err.is_cluster_full());

        let err = BootstrapError::Url(UrlError::Empty);
        assert_eq!(err.fault(), Fault::Configuration);
        assert_eq!(BootstrapError::ServingFailed.fault(), Fault::Serving);
    }

    fn local_config(dir: &Path) -> NodeConfig {
        let mut config = NodeConfig {
            name: "infra0".to_string(),
            data_dir: Some(dir.to_path_buf()),
            ..NodeConfig::default()
        };
        config.urls.listen_peer = vec!["http://127.0.0.1:0".to_string()];
        config.urls.listen_client = vec!["http://127.0.0.1:0".to_string()];
        config.urls.advertise_peer = vec!["http://127.0.0.1:12380".to_string()];
        config.urls.advertise_client = vec!["http://127.0.0.1:12379".to_string()];
        config
    }

    #[tokio::test]
    async fn member_starts_and_stops_through_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InterruptRegistry::new();
        let bootstrap = Bootstrap::new(local_config(dir.path()), registry.clone(), Collaborators::standard());
        let state = bootstrap.subscribe_state();

        let running = bootstrap.start().await.unwrap();
        assert_eq!(running.mode(), RunMode::Member);
        assert_eq!(*state.borrow(), BootstrapState::Running);
        assert_eq!(resolve_dir_state(dir.path()).unwrap(), DirState::Member);

        let client = running.client_addrs()[0];
        let members = reqwest::get(format!("http://{}/members", client))
            .await
            .unwrap()
            .json::<crate::proxy::RemoteCluster>()
            .await
            .unwrap();
        assert_eq!(members.members[0].name, "infra0");

        let waiter = tokio::spawn(running.wait());
        registry.stop();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(*state.borrow(), BootstrapState::Terminated);
        assert!(tokio::net::TcpStream::connect(client).await.is_err());
    }

    #[tokio::test]
    async fn conflicting_data_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("member")).unwrap();
        std::fs::create_dir(dir.path().join("proxy")).unwrap();

        let bootstrap = Bootstrap::new(
            local_config(dir.path()),
            InterruptRegistry::new(),
            Collaborators::standard(),
        );
        let err = bootstrap.start().await.err().unwrap();
        assert!(matches!(err, BootstrapError::Mode(ModeError::Conflict(_))));
        assert_eq!(err.fault(), Fault::Configuration);
    }

    #[tokio::test]
    async fn proxy_forwarding_transport_uses_client_tls() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        config.proxy.mode = crate::config::ProxyMode::On;
        config.client_tls.ca_file = Some(dir.path().join("missing-client-ca.pem"));

        let bootstrap = Bootstrap::new(config, InterruptRegistry::new(), Collaborators::standard());
        let err = bootstrap.start().await.err().unwrap();
        assert!(matches!(err, BootstrapError::Transport(TransportError::ReadCa { .. })));
        assert_eq!(err.fault(), Fault::ResourceAcquisition);
    }

    #[tokio::test]
    async fn member_failure_closes_listeners() {
        let dir = tempfile::tempdir().unwrap();
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut config = local_config(dir.path());
        config.urls.listen_peer = vec![format!("http://127.0.0.1:{}", port)];
        // Not part of its own initial cluster.
        config.cluster.initial = Some("other=http://127.0.0.1:12380".to_string());

        let bootstrap = Bootstrap::new(config, InterruptRegistry::new(), Collaborators::standard());
        let err = bootstrap.start().await.err().unwrap();
        assert!(matches!(err, BootstrapError::Member(MemberError::NotInCluster { .. })));

        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }
}
