//! A proxy forwarding client traffic to a member running in the same process.

mod common;

use std::time::Duration;

use clusterd::config::ProxyMode;
use clusterd::lifecycle::RunMode;
use clusterd::{Bootstrap, Collaborators, InterruptRegistry};
use reqwest::StatusCode;

use common::{free_port, node_config};

#[tokio::test]
async fn proxy_forwards_to_member() {
    let member_dir = tempfile::tempdir().unwrap();
    let proxy_dir = tempfile::tempdir().unwrap();

    let member_registry = InterruptRegistry::new();
    let member = Bootstrap::new(
        node_config("infra0", member_dir.path(), free_port(), free_port()),
        member_registry.clone(),
        Collaborators::standard(),
    )
    .start()
    .await
    .unwrap();
    assert_eq!(member.mode(), RunMode::Member);
    let member_peer = member.peer_addrs()[0];

    let mut config = node_config("proxy0", proxy_dir.path(), free_port(), free_port());
    config.proxy.mode = ProxyMode::Readonly;
    config.cluster.initial = Some(format!("infra0=http://{}", member_peer));

    let proxy_registry = InterruptRegistry::new();
    let proxy = Bootstrap::new(config, proxy_registry.clone(), Collaborators::standard())
        .start()
        .await
        .unwrap();
    assert_eq!(proxy.mode(), RunMode::Proxy);
    assert!(proxy.peer_addrs().is_empty());
    let proxy_client = proxy.client_addrs()[0];

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/version", proxy_client))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let version: serde_json::Value = response.json().await.unwrap();
    assert_eq!(version["cluster"], "clusterd-cluster");

    let response = client
        .put(format!("http://{}/v2/keys/foo", proxy_client))
        .body("value=bar")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

    // Member gone: the proxy reports it cannot reach any endpoint.
    let waiter = tokio::spawn(member.wait());
    member_registry.stop();
    waiter.await.unwrap().unwrap();

    let response = client
        .get(format!("http://{}/version", proxy_client))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let waiter = tokio::spawn(proxy.wait());
    proxy_registry.stop();
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
