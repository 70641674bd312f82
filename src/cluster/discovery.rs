//! Cluster discovery.
//!
//! Two ways of learning the initial cluster without a static list:
//!
//! - a discovery service addressed by a token URL, which members register with
//!   until the expected cluster size is reached
//! - DNS SRV records under a domain (`_clusterd-server._tcp.<domain>` and the
//!   `-ssl` variant for https peers)
//!
//! Both produce a `name=url[,name=url...]` cluster string.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::urls::NodeUrl;
use crate::resilience::backoff::RetryPolicy;

/// SRV service for https peers.
pub const SRV_SERVICE_TLS: &str = "clusterd-server-ssl";
/// SRV service for plain http peers.
pub const SRV_SERVICE: &str = "clusterd-server";

/// Discovery error types.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery token already has its full set of members.
    #[error("discovery: cluster is full")]
    FullCluster,

    /// This member name was already registered under the token.
    #[error("discovery: found duplicate id")]
    DuplicateId,

    #[error("discovery: token not found at {0}")]
    TokenNotFound(String),

    #[error("discovery: unexpected status {status} from {url}")]
    BadStatus { url: String, status: StatusCode },

    #[error("discovery: request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("discovery: cluster did not reach size {size} after {attempts} attempts")]
    TooManyRetries { size: usize, attempts: u32 },

    #[error("discovery: SRV discovery failed: {0}")]
    Dns(String),
}

/// Discovery collaborator used during bootstrap.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Register `name` under the discovery URL and wait for the cluster to
    /// reach its configured size. Returns the cluster string.
    async fn join_cluster(
        &self,
        durl: &str,
        proxy: Option<&str>,
        name: &str,
        peer_urls: &[NodeUrl],
    ) -> Result<String, DiscoveryError>;

    /// Read the complete cluster registered under the discovery URL.
    async fn get_cluster(&self, durl: &str, proxy: Option<&str>) -> Result<String, DiscoveryError>;

    /// Assemble the initial cluster from DNS SRV records.
    /// Returns the cluster string and the bootstrap token.
    async fn srv_cluster(
        &self,
        name: &str,
        domain: &str,
        token: &str,
        peer_urls: &[NodeUrl],
    ) -> Result<(String, String), DiscoveryError>;
}

/// Document served by the discovery service at the token URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterDocument {
    pub size: usize,
    #[serde(default)]
    pub members: Vec<RegisteredMember>,
}

/// One registration under a discovery token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredMember {
    pub name: String,
    #[serde(rename = "peerURLs")]
    pub peer_urls: Vec<String>,
}

impl ClusterDocument {
    pub fn is_complete(&self) -> bool {
        self.size > 0 && self.members.len() >= self.size
    }

    /// Cluster string of the first `size` registrations.
    pub fn cluster_string(&self) -> String {
        self.members
            .iter()
            .take(self.size)
            .flat_map(|m| m.peer_urls.iter().map(move |u| format!("{}={}", m.name, u)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Discovery over HTTP and DNS.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    timeout: Duration,
    retry: RetryPolicy,
}

impl Default for HttpDiscovery {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), RetryPolicy::default())
    }
}

impl HttpDiscovery {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }

    fn client(&self, proxy: Option<&str>) -> Result<reqwest::Client, DiscoveryError> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(builder.build()?)
    }

    async fn fetch(
        &self,
        client: &reqwest::Client,
        durl: &str,
    ) -> Result<ClusterDocument, DiscoveryError> {
        let response = client.get(durl).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(DiscoveryError::TokenNotFound(durl.to_string())),
            s if s.is_success() => Ok(response.json().await?),
            status => Err(DiscoveryError::BadStatus {
                url: durl.to_string(),
                status,
            }),
        }
    }

    /// Poll until the registered members reach the configured size.
    async fn wait_complete(
        &self,
        client: &reqwest::Client,
        durl: &str,
    ) -> Result<ClusterDocument, DiscoveryError> {
        let mut last_size = 0;
        for attempt in 1..=self.retry.max_attempts {
            let doc = self.fetch(client, durl).await?;
            if doc.is_complete() {
                return Ok(doc);
            }
            last_size = doc.size;
            let delay = self.retry.delay(attempt);
            tracing::info!(
                registered = doc.members.len(),
                size = doc.size,
                retry_in = ?delay,
                "Discovery: waiting for other members"
            );
            tokio::time::sleep(delay).await;
        }
        Err(DiscoveryError::TooManyRetries {
            size: last_size,
            attempts: self.retry.max_attempts,
        })
    }
}

#[async_trait]
impl Discovery for HttpDiscovery {
    async fn join_cluster(
        &self,
        durl: &str,
        proxy: Option<&str>,
        name: &str,
        peer_urls: &[NodeUrl],
    ) -> Result<String, DiscoveryError> {
        let client = self.client(proxy)?;
        let doc = self.fetch(&client, durl).await?;

        if doc.members.iter().any(|m| m.name == name) {
            return Err(DiscoveryError::DuplicateId);
        }
        if doc.is_complete() {
            return Err(DiscoveryError::FullCluster);
        }

        let register_url = format!("{}/members/{}", durl.trim_end_matches('/'), name);
        let registration = RegisteredMember {
            name: name.to_string(),
            peer_urls: peer_urls.iter().map(NodeUrl::to_string).collect(),
        };
        let response = client.put(&register_url).json(&registration).send().await?;
        match response.status() {
            StatusCode::CONFLICT => return Err(DiscoveryError::DuplicateId),
            StatusCode::FORBIDDEN => return Err(DiscoveryError::FullCluster),
            s if s.is_success() => {}
            status => {
                return Err(DiscoveryError::BadStatus {
                    url: register_url,
                    status,
                })
            }
        }
        tracing::info!(name, durl, "Discovery: registered with discovery service");

        let doc = self.wait_complete(&client, durl).await?;
        Ok(doc.cluster_string())
    }

    async fn get_cluster(&self, durl: &str, proxy: Option<&str>) -> Result<String, DiscoveryError> {
        let client = self.client(proxy)?;
        let doc = self.wait_complete(&client, durl).await?;
        Ok(doc.cluster_string())
    }

    async fn srv_cluster(
        &self,
        name: &str,
        domain: &str,
        token: &str,
        peer_urls: &[NodeUrl],
    ) -> Result<(String, String), DiscoveryError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| DiscoveryError::Dns(e.to_string()))?;

        let mut own = HashSet::new();
        for url in peer_urls {
            let resolved = tokio::net::lookup_host(url.host_port())
                .await
                .map_err(|e| DiscoveryError::Dns(format!("resolving {}: {}", url, e)))?;
            own.extend(resolved.take(1));
        }

        let mut records = Vec::new();
        let mut failures = Vec::new();
        for (service, scheme) in [(SRV_SERVICE_TLS, "https"), (SRV_SERVICE, "http")] {
            match lookup_service(&resolver, service, domain).await {
                Ok(addrs) => records.extend(addrs.into_iter().map(|a| (scheme, a))),
                Err(e) => {
                    tracing::debug!(service, domain, error = %e, "SRV lookup failed");
                    failures.push(format!("_{}._tcp.{}: {}", service, domain, e));
                }
            }
        }
        if failures.len() == 2 {
            return Err(DiscoveryError::Dns(failures.join("; ")));
        }

        let parts = assemble_srv_cluster(name, &records, &own);
        for part in &parts {
            tracing::info!(entry = %part, "Discovery: got bootstrap member from DNS");
        }
        Ok((parts.join(","), token.to_string()))
    }
}

async fn lookup_service(
    resolver: &TokioAsyncResolver,
    service: &str,
    domain: &str,
) -> Result<Vec<SocketAddr>, String> {
    let query = format!("_{}._tcp.{}", service, domain);
    let srv = resolver.srv_lookup(query).await.map_err(|e| e.to_string())?;

    let mut addrs = Vec::new();
    for record in srv.iter() {
        let target = record.target().to_utf8();
        match resolver.lookup_ip(target.as_str()).await {
            Ok(ips) => {
                if let Some(ip) = ips.iter().next() {
                    addrs.push(SocketAddr::new(ip, record.port()));
                }
            }
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "Couldn't resolve SRV target");
            }
        }
    }
    Ok(addrs)
}

/// Name SRV targets: the target matching one of our own peer addresses gets
/// our name, the rest get positional names.
pub fn assemble_srv_cluster(
    name: &str,
    records: &[(&str, SocketAddr)],
    own: &HashSet<SocketAddr>,
) -> Vec<String> {
    let mut next_temp = 0usize;
    records
        .iter()
        .map(|(scheme, addr)| {
            let member = if own.contains(addr) {
                name.to_string()
            } else {
                let temp = next_temp.to_string();
                next_temp += 1;
                temp
            };
            format!("{}={}://{}", member, scheme, addr)
        })
        .collect()
}
