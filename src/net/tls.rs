//! TLS configuration and certificate loading.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Acceptor config for a TLS policy, or `None` when it carries no key pair.
pub async fn acceptor_config(tls: &TlsConfig) -> Result<Option<RustlsConfig>, std::io::Error> {
    match (&tls.cert_file, &tls.key_file) {
        (Some(cert), Some(key)) => load_tls_config(cert, key).await.map(Some),
        _ => Ok(None),
    }
}
