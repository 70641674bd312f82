//! Initial membership resolution.
//!
//! Picks the initial peer map and bootstrap token from exactly one source,
//! first match wins:
//!
//! 1. discovery URL: single-entry map for this node, token is the URL itself
//! 2. DNS SRV domain: cluster assembled from SRV records
//! 3. static initial-cluster string

use thiserror::Error;

use crate::cluster::discovery::{Discovery, DiscoveryError};
use crate::cluster::urls::{PeerUrlMap, UrlError};
use crate::config::NodeConfig;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("invalid advertise peer URLs: {0}")]
    AdvertiseUrls(#[source] UrlError),

    #[error("cannot parse initial cluster: {0}")]
    Parse(#[source] UrlError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Which source produced the initial membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipSource {
    Discovery,
    DnsSrv,
    Static,
}

/// Resolved initial membership.
#[derive(Debug, Clone)]
pub struct InitialMembership {
    pub peers: PeerUrlMap,
    pub token: String,
    pub source: MembershipSource,
}

/// Resolve the initial peer map and bootstrap token.
pub async fn resolve(
    config: &NodeConfig,
    discovery: &dyn Discovery,
) -> Result<InitialMembership, MembershipError> {
    if let Some(durl) = &config.cluster.discovery {
        let advertised = config
            .advertise_peer_urls()
            .map_err(MembershipError::AdvertiseUrls)?;
        return Ok(InitialMembership {
            peers: PeerUrlMap::single(config.name.clone(), advertised),
            token: durl.clone(),
            source: MembershipSource::Discovery,
        });
    }

    if let Some(domain) = &config.cluster.discovery_srv {
        let advertised = config
            .advertise_peer_urls()
            .map_err(MembershipError::AdvertiseUrls)?;
        let (cluster, token) = discovery
            .srv_cluster(&config.name, domain, &config.cluster.token, &advertised)
            .await?;
        let peers = PeerUrlMap::parse(&cluster).map_err(MembershipError::Parse)?;
        tracing::info!(domain = %domain, cluster = %peers, "Resolved initial cluster from DNS");
        return Ok(InitialMembership {
            peers,
            token,
            source: MembershipSource::DnsSrv,
        });
    }

    let peers = PeerUrlMap::parse(&config.initial_cluster()).map_err(MembershipError::Parse)?;
    Ok(InitialMembership {
        peers,
        token: config.cluster.token.clone(),
        source: MembershipSource::Static,
    })
}
