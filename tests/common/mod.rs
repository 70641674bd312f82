//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clusterd::cluster::{Discovery, DiscoveryError, NodeUrl};
use clusterd::NodeConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Reserve a local port. The port is free again when this returns.
#[allow(dead_code)]
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Node configuration listening on the given local ports.
#[allow(dead_code)]
pub fn node_config(name: &str, data_dir: &Path, peer_port: u16, client_port: u16) -> NodeConfig {
    let mut config = NodeConfig {
        name: name.to_string(),
        data_dir: Some(data_dir.to_path_buf()),
        ..NodeConfig::default()
    };
    let peer = format!("http://127.0.0.1:{}", peer_port);
    let client = format!("http://127.0.0.1:{}", client_port);
    config.urls.listen_peer = vec![peer.clone()];
    config.urls.advertise_peer = vec![peer];
    config.urls.listen_client = vec![client.clone()];
    config.urls.advertise_client = vec![client];
    config.proxy.refresh_interval_secs = 1;
    config
}

/// Start a mock backend that answers every request with `status` and `body`.
#[allow(dead_code)]
pub async fn start_mock_backend(addr: SocketAddr, status: &'static str, body: String) -> SocketAddr {
    let listener = TcpListener::bind(addr).await.unwrap();
    let local = listener.local_addr().unwrap();
    let body = Arc::new(body);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let body = body.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    local
}

/// Start a mock peer answering `/members` with one member whose client URL is
/// `client_url`.
#[allow(dead_code)]
pub async fn start_mock_peer(client_url: &str) -> SocketAddr {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let peer = TcpListener::bind(addr).await.unwrap();
    let peer_addr = peer.local_addr().unwrap();
    drop(peer);

    let body = format!(
        r#"{{"members":[{{"name":"infra0","peerURLs":["http://{}"],"clientURLs":["{}"]}}]}}"#,
        peer_addr, client_url
    );
    start_mock_backend(peer_addr, "200 OK", body).await
}

/// Discovery double with a scripted join result.
#[allow(dead_code)]
pub struct FakeDiscovery {
    pub join: Result<String, fn() -> DiscoveryError>,
    pub cluster: String,
    pub joins: AtomicUsize,
}

#[allow(dead_code)]
impl FakeDiscovery {
    pub fn full(cluster: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            join: Err(|| DiscoveryError::FullCluster),
            cluster: cluster.into(),
            joins: AtomicUsize::new(0),
        })
    }

    pub fn duplicate() -> Arc<Self> {
        Arc::new(Self {
            join: Err(|| DiscoveryError::DuplicateId),
            cluster: String::new(),
            joins: AtomicUsize::new(0),
        })
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Discovery for FakeDiscovery {
    async fn join_cluster(
        &self,
        _durl: &str,
        _proxy: Option<&str>,
        _name: &str,
        _peer_urls: &[NodeUrl],
    ) -> Result<String, DiscoveryError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        match &self.join {
            Ok(cluster) => Ok(cluster.clone()),
            Err(make) => Err(make()),
        }
    }

    async fn get_cluster(&self, _durl: &str, _proxy: Option<&str>) -> Result<String, DiscoveryError> {
        Ok(self.cluster.clone())
    }

    async fn srv_cluster(
        &self,
        _name: &str,
        _domain: &str,
        _token: &str,
        _peer_urls: &[NodeUrl],
    ) -> Result<(String, String), DiscoveryError> {
        Err(DiscoveryError::Dns("no SRV records in tests".to_string()))
    }
}
