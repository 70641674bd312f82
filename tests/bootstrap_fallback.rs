//! Discovery outcomes at startup: falling back to proxy, exiting, and
//! restarting in the mode the data directory records.

mod common;

use std::sync::Arc;
use std::time::Duration;

use clusterd::config::FallbackPolicy;
use clusterd::lifecycle::{Fault, RunMode};
use clusterd::member::LocalMemberFactory;
use clusterd::{Bootstrap, Collaborators, InterruptRegistry};

use common::{free_port, node_config, start_mock_backend, start_mock_peer, FakeDiscovery};

fn collaborators(discovery: Arc<FakeDiscovery>) -> Collaborators {
    Collaborators {
        members: Arc::new(LocalMemberFactory::new(discovery.clone())),
        discovery,
        query: None,
    }
}

#[tokio::test]
async fn full_cluster_falls_back_to_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let backend = start_mock_backend(
        "127.0.0.1:0".parse().unwrap(),
        "200 OK",
        "from-member".to_string(),
    )
    .await;
    let peer = start_mock_peer(&format!("http://{}", backend)).await;
    let discovery = FakeDiscovery::full(format!("infra0=http://{}", peer));

    let mut config = node_config("infra9", dir.path(), free_port(), free_port());
    config.cluster.discovery = Some("http://discovery.invalid/token".to_string());

    let registry = InterruptRegistry::new();
    let running = Bootstrap::new(config, registry.clone(), collaborators(discovery.clone()))
        .start()
        .await
        .expect("startup should fall back instead of failing");

    assert_eq!(running.mode(), RunMode::Proxy);
    assert_eq!(discovery.joins(), 1);
    assert!(dir.path().join("proxy").is_dir());
    assert!(!dir.path().join("member").exists());

    let client = running.client_addrs()[0];
    let body = reqwest::get(format!("http://{}/v2/keys/foo", client))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "from-member");
    assert!(dir.path().join("proxy").join("cluster").is_file());

    let waiter = tokio::spawn(running.wait());
    registry.stop();
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn full_cluster_with_exit_policy_fails() {
    let dir = tempfile::tempdir().unwrap();
    let peer_port = free_port();
    let mut config = node_config("infra9", dir.path(), peer_port, free_port());
    config.cluster.discovery = Some("http://discovery.invalid/token".to_string());
    config.cluster.discovery_fallback = FallbackPolicy::Exit;

    let discovery = FakeDiscovery::full("infra0=http://127.0.0.1:12380");
    let err = Bootstrap::new(config, InterruptRegistry::new(), collaborators(discovery))
        .start()
        .await
        .err()
        .unwrap();

    assert!(err.is_cluster_full());
    assert_eq!(err.fault(), Fault::Discovery);
    assert!(!dir.path().join("proxy").exists());

    // Peer listeners were released.
    std::net::TcpListener::bind(("127.0.0.1", peer_port)).unwrap();
}

#[tokio::test]
async fn duplicate_registration_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = node_config("infra0", dir.path(), free_port(), free_port());
    config.cluster.discovery = Some("http://discovery.invalid/token".to_string());

    let err = Bootstrap::new(
        config,
        InterruptRegistry::new(),
        collaborators(FakeDiscovery::duplicate()),
    )
    .start()
    .await
    .err()
    .unwrap();

    assert!(err.is_duplicate_id());
    assert!(!err.is_cluster_full());
    assert!(!dir.path().join("proxy").exists());
}

#[tokio::test]
async fn restart_keeps_proxy_mode_and_persisted_peers() {
    let dir = tempfile::tempdir().unwrap();
    let backend = start_mock_backend(
        "127.0.0.1:0".parse().unwrap(),
        "200 OK",
        "from-member".to_string(),
    )
    .await;
    let peer = start_mock_peer(&format!("http://{}", backend)).await;
    let discovery = FakeDiscovery::full(format!("infra0=http://{}", peer));

    let mut config = node_config("infra9", dir.path(), free_port(), free_port());
    config.cluster.discovery = Some("http://discovery.invalid/token".to_string());

    let registry = InterruptRegistry::new();
    let running = Bootstrap::new(config.clone(), registry.clone(), collaborators(discovery.clone()))
        .start()
        .await
        .unwrap();
    running.refresher().unwrap().refresh().await;
    let waiter = tokio::spawn(running.wait());
    registry.stop();
    waiter.await.unwrap().unwrap();

    // Second run: no discovery, no proxy flag. The data dir decides.
    config.cluster.discovery = None;
    let registry = InterruptRegistry::new();
    let running = Bootstrap::new(config, registry.clone(), collaborators(discovery.clone()))
        .start()
        .await
        .unwrap();

    assert_eq!(running.mode(), RunMode::Proxy);
    assert_eq!(discovery.joins(), 1);
    assert_eq!(
        running.refresher().unwrap().peer_urls().await,
        vec![format!("http://{}", peer)]
    );

    let waiter = tokio::spawn(running.wait());
    registry.stop();
    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn proxy_directory_with_zero_refresh_interval_keeps_refreshing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("proxy")).unwrap();
    let backend = start_mock_backend(
        "127.0.0.1:0".parse().unwrap(),
        "200 OK",
        "from-member".to_string(),
    )
    .await;
    let peer = start_mock_peer(&format!("http://{}", backend)).await;

    let mut config = node_config("infra9", dir.path(), free_port(), free_port());
    config.cluster.initial = Some(format!("infra0=http://{}", peer));
    config.proxy.refresh_interval_secs = 0;

    let registry = InterruptRegistry::new();
    let running = Bootstrap::new(
        config,
        registry.clone(),
        collaborators(FakeDiscovery::full(String::new())),
    )
    .start()
    .await
    .unwrap();
    assert_eq!(running.mode(), RunMode::Proxy);

    // The background refresher writes the cluster file on its first tick.
    let cluster_file = dir.path().join("proxy").join("cluster");
    let mut waited = Duration::ZERO;
    while !cluster_file.is_file() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert!(cluster_file.is_file());

    let waiter = tokio::spawn(running.wait());
    registry.stop();
    waiter.await.unwrap().unwrap();
}
