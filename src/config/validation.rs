//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate every URL list and value range
//! - Reject conflicting bootstrap sources
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: NodeConfig → Result<(), Vec<ValidationError>>
//! - Runs before any data directory is read or socket opened

use thiserror::Error;

use crate::cluster::urls::{NodeUrl, PeerUrlMap, UrlError};
use crate::config::schema::{NodeConfig, TlsConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("invalid {field}: {source}")]
    Url {
        field: &'static str,
        #[source]
        source: UrlError,
    },

    #[error("invalid initial cluster: {0}")]
    InitialCluster(UrlError),

    #[error("advertise client URLs must be set when listening for clients")]
    UnsetAdvertiseClientUrls,

    #[error("multiple discovery or bootstrap sources are set (initial, discovery, discovery_srv)")]
    ConflictingBootstrap,

    #[error("initial cluster token must not be empty")]
    EmptyToken,

    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeat,

    #[error("election timeout ({election_ms}ms) must be greater than heartbeat interval ({heartbeat_ms}ms)")]
    ElectionTooShort { election_ms: u64, heartbeat_ms: u64 },

    #[error("{role} URL {url} uses https but {role}_tls has no cert_file/key_file")]
    TlsRequired { role: &'static str, url: String },

    #[error("proxy refresh interval must be greater than zero")]
    ZeroRefreshInterval,
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &NodeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }

    let peer_listen = collect(&mut errors, "urls.listen_peer", config.listen_peer_urls());
    let client_listen = collect(&mut errors, "urls.listen_client", config.listen_client_urls());
    collect(&mut errors, "urls.advertise_peer", config.advertise_peer_urls());

    if config.urls.advertise_client.is_empty() {
        if !config.is_proxy() {
            errors.push(ValidationError::UnsetAdvertiseClientUrls);
        }
    } else {
        collect(&mut errors, "urls.advertise_client", config.advertise_client_urls());
    }

    let sources = [
        config.cluster.initial.is_some(),
        config.cluster.discovery.is_some(),
        config.cluster.discovery_srv.is_some(),
    ];
    if sources.iter().filter(|set| **set).count() > 1 {
        errors.push(ValidationError::ConflictingBootstrap);
    }

    if config.cluster.discovery.is_none() && config.cluster.discovery_srv.is_none() {
        if let Err(e) = PeerUrlMap::parse(&config.initial_cluster()) {
            errors.push(ValidationError::InitialCluster(e));
        }
    }

    if let Some(durl) = &config.cluster.discovery {
        if let Err(source) = url::Url::parse(durl) {
            errors.push(ValidationError::Url {
                field: "cluster.discovery",
                source: UrlError::Invalid {
                    url: durl.clone(),
                    source,
                },
            });
        }
    }

    if config.cluster.token.trim().is_empty() {
        errors.push(ValidationError::EmptyToken);
    }

    if config.raft.heartbeat_ms == 0 {
        errors.push(ValidationError::ZeroHeartbeat);
    } else if config.raft.election_ms <= config.raft.heartbeat_ms {
        errors.push(ValidationError::ElectionTooShort {
            election_ms: config.raft.election_ms,
            heartbeat_ms: config.raft.heartbeat_ms,
        });
    }

    // Any node may end up proxying: fallback or an existing proxy directory.
    if config.proxy.refresh_interval_secs == 0 {
        errors.push(ValidationError::ZeroRefreshInterval);
    }

    check_tls(&mut errors, "peer", peer_listen.as_deref(), &config.peer_tls);
    check_tls(&mut errors, "client", client_listen.as_deref(), &config.client_tls);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn collect(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    parsed: Result<Vec<NodeUrl>, UrlError>,
) -> Option<Vec<NodeUrl>> {
    match parsed {
        Ok(urls) => Some(urls),
        Err(source) => {
            errors.push(ValidationError::Url { field, source });
            None
        }
    }
}

fn check_tls(
    errors: &mut Vec<ValidationError>,
    role: &'static str,
    urls: Option<&[NodeUrl]>,
    tls: &TlsConfig,
) {
    let has_keypair = tls.cert_file.is_some() && tls.key_file.is_some();
    for url in urls.unwrap_or_default() {
        if url.is_tls() && !has_keypair {
            errors.push(ValidationError::TlsRequired {
                role,
                url: url.to_string(),
            });
        }
    }
}
