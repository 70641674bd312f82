//! Proxy membership refresher.
//!
//! # Responsibilities
//! - Keep the proxy's peer URLs in step with the cluster
//! - Persist them to the cluster file so a restarted proxy can find the cluster
//! - Publish the client URLs requests are forwarded to
//!
//! # Design Decisions
//! - A failed query or an empty answer keeps the previous state
//! - New state is adopted only after it is durably persisted
//! - Client URLs are an `ArcSwap` snapshot; readers never wait on a refresh
//! - Refreshes are serialized by the async mutex around the peer URLs

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Mutex};
use tokio::time;

use crate::cluster::urls::PeerUrlMap;
use crate::observability::metrics;
use crate::proxy::cluster_file::{ClusterFile, PersistError};
use crate::proxy::query::ClusterQuery;

/// Shortest interval between background refreshes.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

pub struct ProxyMembershipRefresher {
    query: Arc<dyn ClusterQuery>,
    file: ClusterFile,
    peer_urls: Mutex<Vec<String>>,
    client_urls: ArcSwap<Vec<String>>,
}

impl ProxyMembershipRefresher {
    pub fn new(query: Arc<dyn ClusterQuery>, file: ClusterFile, peer_urls: Vec<String>) -> Self {
        Self {
            query,
            file,
            peer_urls: Mutex::new(peer_urls),
            client_urls: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Seed from the cluster file when present, else from the configured map.
    pub fn seeded(
        query: Arc<dyn ClusterQuery>,
        file: ClusterFile,
        fallback: &PeerUrlMap,
    ) -> Result<Self, PersistError> {
        let peer_urls = match file.load()? {
            Some(record) => {
                tracing::info!(
                    path = %file.path().display(),
                    peer_urls = ?record.peer_urls,
                    "Proxy: using peer urls from cluster file"
                );
                record.peer_urls
            }
            None => fallback.urls(),
        };
        Ok(Self::new(query, file, peer_urls))
    }

    /// Currently published client URLs.
    pub fn client_urls(&self) -> Arc<Vec<String>> {
        self.client_urls.load_full()
    }

    pub async fn peer_urls(&self) -> Vec<String> {
        self.peer_urls.lock().await.clone()
    }

    /// Query the cluster and adopt its membership. Returns the client URLs in
    /// effect afterwards.
    pub async fn refresh(&self) -> Arc<Vec<String>> {
        let mut peer_urls = self.peer_urls.lock().await;

        let cluster = match self.query.fetch(&peer_urls).await {
            Ok(cluster) => cluster,
            Err(e) => {
                tracing::warn!(error = %e, "Proxy: failed to refresh cluster membership");
                metrics::record_refresh("query_failed");
                return self.client_urls();
            }
        };
        if cluster.is_empty() {
            tracing::warn!("Proxy: cluster reported no members, keeping previous endpoints");
            metrics::record_refresh("empty");
            return self.client_urls();
        }

        let new_peers = cluster.peer_urls();
        let file = self.file.clone();
        let record = new_peers.clone();
        let stored = match tokio::task::spawn_blocking(move || file.store(&record)).await {
            Ok(stored) => stored.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = stored {
            tracing::error!(error = %e, "Proxy: could not persist cluster membership");
            metrics::record_refresh("persist_failed");
            return self.client_urls();
        }

        let old: BTreeSet<&String> = peer_urls.iter().collect();
        let new: BTreeSet<&String> = new_peers.iter().collect();
        if old != new {
            tracing::info!(
                from = ?peer_urls,
                to = ?new_peers,
                "Proxy: updated peer urls in cluster file"
            );
        }
        *peer_urls = new_peers;

        let client_urls = Arc::new(cluster.client_urls());
        self.client_urls.store(client_urls.clone());
        metrics::record_refresh("ok");
        client_urls
    }

    /// Refresh on a fixed interval until `shutdown` flips to true.
    ///
    /// Intervals shorter than [`MIN_REFRESH_INTERVAL`] are raised to it.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let interval = interval.max(MIN_REFRESH_INTERVAL);
        tracing::info!(interval = ?interval, "Proxy membership refresher starting");
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                changed = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
                    if changed {
                        tracing::info!("Proxy membership refresher received shutdown signal, exiting loop");
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::query::{QueryError, RemoteCluster, RemoteMember};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Answers from a queue, repeating the last answer.
    struct ScriptedQuery {
        answers: StdMutex<Vec<Result<RemoteCluster, ()>>>,
        asked: StdMutex<Vec<Vec<String>>>,
    }

    impl ScriptedQuery {
        fn new(answers: Vec<Result<RemoteCluster, ()>>) -> Arc<Self> {
            Arc::new(Self {
                answers: StdMutex::new(answers),
                asked: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ClusterQuery for ScriptedQuery {
        async fn fetch(&self, peer_urls: &[String]) -> Result<RemoteCluster, QueryError> {
            self.asked.lock().unwrap().push(peer_urls.to_vec());
            let mut answers = self.answers.lock().unwrap();
            let answer = if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers[0].clone()
            };
            answer.map_err(|_| QueryError::Unreachable(peer_urls.join(",")))
        }
    }

    fn cluster(members: &[(&str, &str, &str)]) -> RemoteCluster {
        RemoteCluster {
            members: members
                .iter()
                .map(|(name, peer, client)| RemoteMember {
                    name: name.to_string(),
                    peer_urls: vec![peer.to_string()],
                    client_urls: vec![client.to_string()],
                })
                .collect(),
        }
    }

    fn seed() -> Vec<String> {
        vec!["http://10.0.0.1:2380".to_string()]
    }

    #[tokio::test]
    async fn adopts_and_persists_membership() {
        let dir = tempfile::tempdir().unwrap();
        let query = ScriptedQuery::new(vec![Ok(cluster(&[
            ("a", "http://10.0.0.1:2380", "http://10.0.0.1:2379"),
            ("b", "http://10.0.0.2:2380", "http://10.0.0.2:2379"),
        ]))]);
        let refresher = ProxyMembershipRefresher::new(query, ClusterFile::new(dir.path()), seed());

        let clients = refresher.refresh().await;
        assert_eq!(
            *clients,
            vec!["http://10.0.0.1:2379".to_string(), "http://10.0.0.2:2379".to_string()]
        );
        let record = ClusterFile::new(dir.path()).load().unwrap().unwrap();
        assert_eq!(
            record.peer_urls,
            vec!["http://10.0.0.1:2380".to_string(), "http://10.0.0.2:2380".to_string()]
        );
        assert_eq!(refresher.peer_urls().await, record.peer_urls);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_refreshes_persist_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let query = ScriptedQuery::new(vec![Ok(cluster(&[(
            "a",
            "http://10.0.0.1:2380",
            "http://10.0.0.1:2379",
        )]))]);
        let refresher = Arc::new(ProxyMembershipRefresher::new(
            query.clone(),
            ClusterFile::new(dir.path()),
            seed(),
        ));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let refresher = refresher.clone();
                tokio::spawn(async move { refresher.refresh().await })
            })
            .collect();
        for task in tasks {
            assert_eq!(*task.await.unwrap(), vec!["http://10.0.0.1:2379".to_string()]);
        }

        assert_eq!(query.asked.lock().unwrap().len(), 4);
        let record = ClusterFile::new(dir.path()).load().unwrap().unwrap();
        assert_eq!(record.peer_urls, seed());
    }

    #[tokio::test]
    async fn failed_or_empty_query_keeps_client_urls() {
        let dir = tempfile::tempdir().unwrap();
        let query = ScriptedQuery::new(vec![
            Ok(cluster(&[("a", "http://10.0.0.1:2380", "http://10.0.0.1:2379")])),
            Err(()),
            Ok(RemoteCluster::default()),
        ]);
        let refresher = ProxyMembershipRefresher::new(query, ClusterFile::new(dir.path()), seed());

        let first = refresher.refresh().await;
        let after_failure = refresher.refresh().await;
        let after_empty = refresher.refresh().await;

        assert_eq!(*first, vec!["http://10.0.0.1:2379".to_string()]);
        assert_eq!(after_failure, first);
        assert_eq!(after_empty, first);
        assert_eq!(refresher.client_urls(), first);
    }

    #[tokio::test]
    async fn persist_failure_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let query = ScriptedQuery::new(vec![Ok(cluster(&[(
            "b",
            "http://10.0.0.2:2380",
            "http://10.0.0.2:2379",
        )]))]);
        let missing = dir.path().join("missing");
        let refresher = ProxyMembershipRefresher::new(query, ClusterFile::new(&missing), seed());

        let clients = refresher.refresh().await;
        assert!(clients.is_empty());
        assert_eq!(refresher.peer_urls().await, seed());
    }

    #[tokio::test]
    async fn next_query_uses_adopted_peers() {
        let dir = tempfile::tempdir().unwrap();
        let query = ScriptedQuery::new(vec![Ok(cluster(&[(
            "b",
            "http://10.0.0.2:2380",
            "http://10.0.0.2:2379",
        )]))]);
        let refresher =
            ProxyMembershipRefresher::new(query.clone(), ClusterFile::new(dir.path()), seed());

        refresher.refresh().await;
        refresher.refresh().await;

        let asked = query.asked.lock().unwrap();
        assert_eq!(asked[0], seed());
        assert_eq!(asked[1], vec!["http://10.0.0.2:2380".to_string()]);
    }

    #[tokio::test]
    async fn seeds_from_cluster_file_first() {
        let dir = tempfile::tempdir().unwrap();
        let file = ClusterFile::new(dir.path());
        let map = PeerUrlMap::parse("a=http://10.0.0.1:2380").unwrap();
        let query = ScriptedQuery::new(vec![Err(())]);

        let refresher =
            ProxyMembershipRefresher::seeded(query.clone(), file.clone(), &map).unwrap();
        assert_eq!(refresher.peer_urls().await, seed());

        file.store(&["http://10.0.0.9:2380".to_string()]).unwrap();
        let refresher = ProxyMembershipRefresher::seeded(query, file, &map).unwrap();
        assert_eq!(
            refresher.peer_urls().await,
            vec!["http://10.0.0.9:2380".to_string()]
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let query = ScriptedQuery::new(vec![Err(())]);
        let refresher = Arc::new(ProxyMembershipRefresher::new(
            query.clone(),
            ClusterFile::new(dir.path()),
            seed(),
        ));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(refresher.run(Duration::from_millis(10), stop_rx));
        time::sleep(Duration::from_millis(35)).await;
        stop_tx.send_replace(true);

        time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(query.asked.lock().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn zero_interval_is_raised_to_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let query = ScriptedQuery::new(vec![Err(())]);
        let refresher = Arc::new(ProxyMembershipRefresher::new(
            query.clone(),
            ClusterFile::new(dir.path()),
            seed(),
        ));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(refresher.run(Duration::ZERO, stop_rx));
        time::sleep(MIN_REFRESH_INTERVAL / 2).await;
        assert!(!task.is_finished());
        stop_tx.send_replace(true);

        time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        let asked = query.asked.lock().unwrap().len();
        assert!((1..=2).contains(&asked));
    }
}
