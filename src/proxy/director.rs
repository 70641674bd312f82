//! Endpoint selection for the forwarding proxy.
//!
//! # Responsibilities
//! - Track the client URLs the refresher publishes
//! - Hand out endpoints round-robin, skipping ones that recently failed
//! - Ask for an on-demand refresh when nothing is usable
//!
//! # Design Decisions
//! - A failed endpoint is skipped for a cool-down, then tried again
//! - Failure state survives a rebuild for URLs that are still members

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

use crate::proxy::refresher::ProxyMembershipRefresher;

/// A single client URL requests may be forwarded to.
#[derive(Debug)]
pub struct Endpoint {
    pub url: String,
    failed_at: Mutex<Option<Instant>>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            failed_at: Mutex::new(None),
        }
    }

    /// Return true if the endpoint has not failed within `wait`.
    pub fn is_available(&self, wait: Duration) -> bool {
        match *self.failed_at.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(at) => at.elapsed() >= wait,
            None => true,
        }
    }

    /// Report a failed request.
    pub fn mark_failed(&self) {
        *self.failed_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Report a successful request.
    pub fn mark_ok(&self) {
        *self.failed_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[derive(Debug, Default)]
struct EndpointSet {
    source: Arc<Vec<String>>,
    endpoints: Vec<Arc<Endpoint>>,
}

/// Round-robin selection over the published client URLs.
pub struct Director {
    refresher: Arc<ProxyMembershipRefresher>,
    failure_wait: Duration,
    counter: AtomicUsize,
    current: ArcSwap<EndpointSet>,
}

impl Director {
    pub fn new(refresher: Arc<ProxyMembershipRefresher>, failure_wait: Duration) -> Self {
        Self {
            refresher,
            failure_wait,
            counter: AtomicUsize::new(0),
            current: ArcSwap::from_pointee(EndpointSet::default()),
        }
    }

    /// Endpoint set matching the refresher's latest client URLs.
    fn endpoint_set(&self) -> Arc<EndpointSet> {
        let published = self.refresher.client_urls();
        let current = self.current.load_full();
        if Arc::ptr_eq(&current.source, &published) {
            return current;
        }

        let endpoints = published
            .iter()
            .map(|url| {
                current
                    .endpoints
                    .iter()
                    .find(|e| &e.url == url)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Endpoint::new(url.clone())))
            })
            .collect::<Vec<_>>();
        tracing::debug!(endpoints = ?published, "Proxy: endpoints updated");

        let rebuilt = Arc::new(EndpointSet {
            source: published,
            endpoints,
        });
        self.current.store(rebuilt.clone());
        rebuilt
    }

    /// Usable endpoints, rotated so successive calls start at the next one.
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        let set = self.endpoint_set();
        let usable: Vec<Arc<Endpoint>> = set
            .endpoints
            .iter()
            .filter(|e| e.is_available(self.failure_wait))
            .cloned()
            .collect();
        if usable.is_empty() {
            return usable;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed) % usable.len();
        usable[start..].iter().chain(&usable[..start]).cloned().collect()
    }

    /// Like [`endpoints`](Self::endpoints), refreshing membership once if none
    /// is usable.
    pub async fn available(&self) -> Vec<Arc<Endpoint>> {
        let endpoints = self.endpoints();
        if !endpoints.is_empty() {
            return endpoints;
        }
        tracing::debug!("Proxy: no usable endpoints, refreshing membership");
        self.refresher.refresh().await;
        self.endpoints()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::cluster_file::ClusterFile;
    use crate::proxy::query::{ClusterQuery, QueryError, RemoteCluster, RemoteMember};
    use async_trait::async_trait;

    struct StaticQuery(Vec<&'static str>);

    #[async_trait]
    impl ClusterQuery for StaticQuery {
        async fn fetch(&self, _peer_urls: &[String]) -> Result<RemoteCluster, QueryError> {
            Ok(RemoteCluster {
                members: self
                    .0
                    .iter()
                    .map(|client| RemoteMember {
                        name: client.to_string(),
                        peer_urls: vec!["http://10.0.0.1:2380".to_string()],
                        client_urls: vec![client.to_string()],
                    })
                    .collect(),
            })
        }
    }

    fn director(dir: &std::path::Path, clients: Vec<&'static str>, wait: Duration) -> Director {
        let refresher = ProxyMembershipRefresher::new(
            Arc::new(StaticQuery(clients)),
            ClusterFile::new(dir),
            vec!["http://10.0.0.1:2380".to_string()],
        );
        Director::new(Arc::new(refresher), wait)
    }

    #[tokio::test]
    async fn refreshes_on_demand_and_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let director = director(dir.path(), vec!["http://a:2379", "http://b:2379"], Duration::from_secs(5));

        assert!(director.endpoints().is_empty());
        let first = director.available().await;
        assert_eq!(first.len(), 2);

        let second = director.endpoints();
        assert_ne!(first[0].url, second[0].url);
        let third = director.endpoints();
        assert_eq!(first[0].url, third[0].url);
    }

    #[tokio::test]
    async fn failed_endpoint_cools_down() {
        let dir = tempfile::tempdir().unwrap();
        let director = director(dir.path(), vec!["http://a:2379", "http://b:2379"], Duration::from_millis(50));

        let endpoints = director.available().await;
        let failed = endpoints.iter().find(|e| e.url == "http://a:2379").unwrap();
        failed.mark_failed();

        let usable = director.endpoints();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].url, "http://b:2379");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(director.endpoints().len(), 2);
    }
}
