//! Outbound HTTP transport.
//!
//! One `reqwest` client per role is shared by everything that talks to other
//! nodes: the member server's peer traffic, membership queries and the proxy's
//! forwarding path.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::{TimeoutConfig, TlsConfig};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to read CA file {path:?}: {source}")]
    ReadCa {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CA certificate {path:?}: {source}")]
    Certificate {
        path: PathBuf,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Build an HTTP client trusting the policy's CA file, if any.
pub fn build_client(tls: &TlsConfig, timeouts: &TimeoutConfig) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(timeouts.dial())
        .timeout(timeouts.request())
        .pool_idle_timeout(timeouts.peer_request());

    if let Some(path) = &tls.ca_file {
        let pem = std::fs::read(path).map_err(|source| TransportError::ReadCa {
            path: path.clone(),
            source,
        })?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|source| TransportError::Certificate {
            path: path.clone(),
            source,
        })?;
        builder = builder.add_root_certificate(cert);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_client_builds() {
        assert!(build_client(&TlsConfig::default(), &TimeoutConfig::default()).is_ok());
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let tls = TlsConfig {
            ca_file: Some("/nonexistent/ca.pem".into()),
            ..TlsConfig::default()
        };
        let err = build_client(&tls, &TimeoutConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::ReadCa { .. }));
    }
}
