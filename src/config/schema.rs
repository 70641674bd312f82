//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a node.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::urls::{parse_urls, NodeUrl, UrlError};

/// Member name used when none is configured.
pub const DEFAULT_NAME: &str = "default";

/// Root configuration for a cluster node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Human-readable member name, unique within the cluster.
    pub name: String,

    /// Data directory. Defaults to `<name>.clusterd`.
    pub data_dir: Option<PathBuf>,

    /// Listen and advertise URLs.
    pub urls: UrlConfig,

    /// Bootstrap settings.
    pub cluster: ClusterConfig,

    /// Proxy mode settings.
    pub proxy: ProxySettings,

    /// Snapshot and WAL retention handed to the member server.
    pub storage: StorageConfig,

    /// Heartbeat and election timing.
    pub raft: RaftConfig,

    /// Cross-origin policy for client-facing handlers.
    pub cors: CorsConfig,

    /// TLS for peer traffic.
    pub peer_tls: TlsConfig,

    /// TLS for client traffic.
    pub client_tls: TlsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            data_dir: None,
            urls: UrlConfig::default(),
            cluster: ClusterConfig::default(),
            proxy: ProxySettings::default(),
            storage: StorageConfig::default(),
            raft: RaftConfig::default(),
            cors: CorsConfig::default(),
            peer_tls: TlsConfig::default(),
            client_tls: TlsConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Data directory, falling back to `<name>.clusterd`.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.clusterd", self.name)))
    }

    /// The static initial-cluster string.
    ///
    /// When none is configured it is derived from this node's name and its
    /// advertised peer URLs.
    pub fn initial_cluster(&self) -> String {
        match &self.cluster.initial {
            Some(initial) => initial.clone(),
            None => self
                .urls
                .advertise_peer
                .iter()
                .map(|u| format!("{}={}", self.name, u))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy.mode != ProxyMode::Off
    }

    pub fn is_readonly_proxy(&self) -> bool {
        self.proxy.mode == ProxyMode::Readonly
    }

    pub fn should_fallback_to_proxy(&self) -> bool {
        self.cluster.discovery_fallback == FallbackPolicy::Proxy
    }

    pub fn is_new_cluster(&self) -> bool {
        self.cluster.state == ClusterState::New
    }

    /// Election timeout expressed in heartbeat ticks.
    pub fn election_ticks(&self) -> u64 {
        self.raft.election_ms / self.raft.heartbeat_ms.max(1)
    }

    pub fn listen_peer_urls(&self) -> Result<Vec<NodeUrl>, UrlError> {
        parse_ordered(&self.urls.listen_peer)
    }

    pub fn listen_client_urls(&self) -> Result<Vec<NodeUrl>, UrlError> {
        parse_ordered(&self.urls.listen_client)
    }

    pub fn advertise_peer_urls(&self) -> Result<Vec<NodeUrl>, UrlError> {
        parse_urls(&self.urls.advertise_peer)
    }

    pub fn advertise_client_urls(&self) -> Result<Vec<NodeUrl>, UrlError> {
        parse_urls(&self.urls.advertise_client)
    }
}

/// Listen URLs keep their configured order: listeners open in that order.
fn parse_ordered(raw: &[String]) -> Result<Vec<NodeUrl>, UrlError> {
    if raw.is_empty() {
        return Err(UrlError::Empty);
    }
    raw.iter().map(|u| NodeUrl::parse(u)).collect()
}

/// Listen and advertise URLs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UrlConfig {
    /// URLs to listen on for peer traffic.
    pub listen_peer: Vec<String>,

    /// URLs to listen on for client traffic.
    pub listen_client: Vec<String>,

    /// Peer URLs advertised to the rest of the cluster.
    pub advertise_peer: Vec<String>,

    /// Client URLs advertised to the rest of the cluster.
    pub advertise_client: Vec<String>,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            listen_peer: vec!["http://localhost:2380".to_string()],
            listen_client: vec!["http://localhost:2379".to_string()],
            advertise_peer: vec!["http://localhost:2380".to_string()],
            advertise_client: vec!["http://localhost:2379".to_string()],
        }
    }
}

/// Whether the member bootstraps a new cluster or joins an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    New,
    Existing,
}

/// What to do when discovery reports the cluster is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    Exit,
    Proxy,
}

/// Bootstrap configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Static initial cluster, `name=url[,name=url...]`.
    pub initial: Option<String>,

    /// Initial cluster state.
    pub state: ClusterState,

    /// Bootstrap token for the static and DNS paths.
    pub token: String,

    /// Discovery service URL. Also used verbatim as the bootstrap token.
    pub discovery: Option<String>,

    /// HTTP proxy used to reach the discovery service.
    pub discovery_proxy: Option<String>,

    /// DNS domain holding the SRV records of the initial cluster.
    pub discovery_srv: Option<String>,

    /// Behaviour when discovery reports the cluster is full.
    pub discovery_fallback: FallbackPolicy,

    /// Force a new single-member cluster from existing data.
    pub force_new: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            initial: None,
            state: ClusterState::New,
            token: "clusterd-cluster".to_string(),
            discovery: None,
            discovery_proxy: None,
            discovery_srv: None,
            discovery_fallback: FallbackPolicy::Proxy,
            force_new: false,
        }
    }
}

/// Proxy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    Off,
    On,
    Readonly,
}

/// Proxy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    pub mode: ProxyMode,

    /// Interval between background membership refreshes.
    pub refresh_interval_secs: u64,

    /// How long a failed endpoint is skipped before it is tried again.
    pub endpoint_failure_wait_secs: u64,

    /// Maximum buffered request body.
    pub max_body_bytes: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            mode: ProxyMode::Off,
            refresh_interval_secs: 30,
            endpoint_failure_wait_secs: 5,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ProxySettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn endpoint_failure_wait(&self) -> Duration {
        Duration::from_secs(self.endpoint_failure_wait_secs)
    }
}

/// Snapshot and WAL retention.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Committed entries between snapshots.
    pub snap_count: u64,

    /// Snapshot files to retain (0 = unlimited).
    pub max_snap_files: u32,

    /// WAL files to retain (0 = unlimited).
    pub max_wal_files: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snap_count: 10_000,
            max_snap_files: 5,
            max_wal_files: 5,
        }
    }
}

/// Heartbeat and election timing in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RaftConfig {
    pub heartbeat_ms: u64,
    pub election_ms: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 100,
            election_ms: 1000,
        }
    }
}

/// Allowed cross-origin request origins. Empty disables CORS, `*` allows any.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub origins: Vec<String>,
}

/// TLS file locations (PEM).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
}

impl TlsConfig {
    pub fn is_empty(&self) -> bool {
        self.cert_file.is_none() && self.key_file.is_none() && self.ca_file.is_none()
    }
}

/// Timeout configuration for outbound and inbound traffic.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout for outbound calls.
    pub dial_ms: u64,

    /// Total timeout of one outbound or client request.
    pub request_secs: u64,

    /// Timeout of one inbound peer request.
    pub peer_request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_ms: 1000,
            request_secs: 5,
            peer_request_secs: 300,
        }
    }
}

impl TimeoutConfig {
    pub fn dial(&self) -> Duration {
        Duration::from_millis(self.dial_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn peer_request(&self) -> Duration {
        Duration::from_secs(self.peer_request_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Shortcut for `log_level = "debug"`.
    pub debug: bool,

    /// Per-module levels, e.g. `"proxy=debug,cluster=warn"`.
    pub log_package_levels: String,

    /// Prometheus exporter bind address; disabled when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            debug: false,
            log_package_levels: String::new(),
            metrics_address: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_cluster_derives_from_name() {
        let mut config = NodeConfig {
            name: "infra0".to_string(),
            ..NodeConfig::default()
        };
        assert_eq!(config.initial_cluster(), "infra0=http://localhost:2380");

        config.cluster.initial = Some("a=http://10.0.0.1:2380".to_string());
        assert_eq!(config.initial_cluster(), "a=http://10.0.0.1:2380");
    }

    #[test]
    fn data_dir_defaults_to_name() {
        let config = NodeConfig {
            name: "infra0".to_string(),
            ..NodeConfig::default()
        };
        assert_eq!(config.data_dir(), PathBuf::from("infra0.clusterd"));
    }

    #[test]
    fn election_ticks_divides_by_heartbeat() {
        let config = NodeConfig::default();
        assert_eq!(config.election_ticks(), 10);
    }

    #[test]
    fn toml_sections_deserialize() {
        let config: NodeConfig = toml::from_str(
            r#"
            name = "proxy0"

            [proxy]
            mode = "readonly"

            [cluster]
            discovery_fallback = "exit"
            "#,
        )
        .unwrap();

        assert!(config.is_proxy());
        assert!(config.is_readonly_proxy());
        assert!(!config.should_fallback_to_proxy());
        assert_eq!(config.urls.listen_client, vec!["http://localhost:2379".to_string()]);
    }
}
