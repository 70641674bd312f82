//! Authoritative membership queries.
//!
//! Peers answer `GET /members` with the cluster they currently belong to. The
//! refresher asks each known peer in turn until one answers.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no peer URLs to query")]
    NoPeers,

    #[error("could not retrieve cluster information from the given urls: {0}")]
    Unreachable(String),
}

/// One member as reported by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMember {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "peerURLs", default)]
    pub peer_urls: Vec<String>,
    #[serde(rename = "clientURLs", default)]
    pub client_urls: Vec<String>,
}

/// The cluster as reported by a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCluster {
    #[serde(default)]
    pub members: Vec<RemoteMember>,
}

impl RemoteCluster {
    /// All peer URLs, sorted and de-duplicated.
    pub fn peer_urls(&self) -> Vec<String> {
        flatten(self.members.iter().flat_map(|m| m.peer_urls.iter()))
    }

    /// All client URLs, sorted and de-duplicated.
    pub fn client_urls(&self) -> Vec<String> {
        flatten(self.members.iter().flat_map(|m| m.client_urls.iter()))
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn flatten<'a>(urls: impl Iterator<Item = &'a String>) -> Vec<String> {
    urls.map(|u| u.trim_end_matches('/').to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Cluster query collaborator.
#[async_trait]
pub trait ClusterQuery: Send + Sync {
    async fn fetch(&self, peer_urls: &[String]) -> Result<RemoteCluster, QueryError>;
}

/// Queries `GET <peer>/members` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpClusterQuery {
    client: reqwest::Client,
}

impl HttpClusterQuery {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_one(&self, peer: &str) -> Result<RemoteCluster, reqwest::Error> {
        let url = format!("{}/members", peer.trim_end_matches('/'));
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl ClusterQuery for HttpClusterQuery {
    async fn fetch(&self, peer_urls: &[String]) -> Result<RemoteCluster, QueryError> {
        if peer_urls.is_empty() {
            return Err(QueryError::NoPeers);
        }
        for peer in peer_urls {
            match self.fetch_one(peer).await {
                Ok(cluster) => return Ok(cluster),
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "Could not get cluster from peer");
                }
            }
        }
        Err(QueryError::Unreachable(peer_urls.join(",")))
    }
}
