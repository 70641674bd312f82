//! Listener sets for peer and client traffic.
//!
//! # Responsibilities
//! - Bind one listener per configured URL, in order
//! - Attach the rustls acceptor config to `https` listeners
//! - Roll back: if any bind fails, close everything opened so far
//!
//! # Design Decisions
//! - A handle owns its socket; closing it is dropping it, with a log line
//! - Sockets are kept as std listeners so they can be handed to either
//!   `axum::serve` or `axum-server`'s rustls acceptor

use std::fmt;
use std::net::SocketAddr;

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::cluster::urls::NodeUrl;
use crate::config::TlsConfig;
use crate::net::tls;

/// Gauge of listening sockets, labelled by role.
pub(crate) const OPEN_LISTENERS: &str = "clusterd_open_listeners";

/// Which traffic a listener carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Peer,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Peer => write!(f, "peer"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// An `https` URL was configured without a certificate and key.
    #[error("{role} TLS info is required to listen on {url}")]
    TlsRequired { role: Role, url: String },

    #[error("failed to load {role} TLS config: {source}")]
    Tls {
        role: Role,
        #[source]
        source: std::io::Error,
    },

    /// Failed to bind to address.
    #[error("failed to listen on {url}: {source}")]
    Bind {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// One bound listening socket.
pub struct ListenerHandle {
    url: NodeUrl,
    role: Role,
    local_addr: SocketAddr,
    socket: std::net::TcpListener,
    tls: Option<RustlsConfig>,
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("url", &self.url.to_string())
            .field("role", &self.role)
            .field("local_addr", &self.local_addr)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl ListenerHandle {
    async fn bind(url: &NodeUrl, role: Role, tls: Option<RustlsConfig>) -> Result<Self, ListenerError> {
        let bind_err = |source| ListenerError::Bind {
            url: url.to_string(),
            source,
        };

        let listener = TcpListener::bind(url.host_port()).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        let socket = listener.into_std().map_err(bind_err)?;

        tracing::info!(
            address = %local_addr,
            url = %url,
            role = %role,
            tls = tls.is_some(),
            "Listening"
        );
        metrics::gauge!(OPEN_LISTENERS, "role" => role.to_string()).increment(1.0);

        Ok(Self {
            url: url.clone(),
            role,
            local_addr,
            socket,
            tls,
        })
    }

    pub fn url(&self) -> &NodeUrl {
        &self.url
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Split into the raw socket and its TLS config for serving.
    pub(crate) fn into_parts(self) -> (std::net::TcpListener, Option<RustlsConfig>) {
        let ListenerHandle { socket, tls, .. } = self;
        (socket, tls)
    }

    /// Close the socket.
    pub fn close(self) {
        record_closed(self.local_addr, self.role);
        drop(self.socket);
    }
}

/// Account for a listener that stopped listening.
pub(crate) fn record_closed(addr: SocketAddr, role: Role) {
    tracing::info!(address = %addr, role = %role, "Stopping listening");
    metrics::gauge!(OPEN_LISTENERS, "role" => role.to_string()).decrement(1.0);
}

/// All listeners of one role.
#[derive(Debug, Default)]
pub struct ListenerSet {
    handles: Vec<ListenerHandle>,
}

impl ListenerSet {
    /// Bind one listener per URL, in order.
    ///
    /// On failure every listener opened by this call is closed, in reverse
    /// order, before the error is returned.
    pub async fn open(urls: &[NodeUrl], role: Role, tls: &TlsConfig) -> Result<Self, ListenerError> {
        let mut set = ListenerSet::default();
        for url in urls {
            match Self::open_one(url, role, tls).await {
                Ok(handle) => set.handles.push(handle),
                Err(e) => {
                    tracing::error!(url = %url, role = %role, error = %e, "Failed to open listener");
                    set.close_all();
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    async fn open_one(url: &NodeUrl, role: Role, tls: &TlsConfig) -> Result<ListenerHandle, ListenerError> {
        let acceptor = if url.is_tls() {
            let config = tls::acceptor_config(tls)
                .await
                .map_err(|source| ListenerError::Tls { role, source })?;
            Some(config.ok_or_else(|| ListenerError::TlsRequired {
                role,
                url: url.to_string(),
            })?)
        } else {
            if tls.cert_file.is_some() {
                tracing::warn!(url = %url, role = %role, "TLS configured but listening on plain http");
            }
            None
        };
        ListenerHandle::bind(url, role, acceptor).await
    }

    /// Close every listener, most recently opened first.
    pub fn close_all(&mut self) {
        while let Some(handle) = self.handles.pop() {
            handle.close();
        }
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.handles.iter().map(ListenerHandle::local_addr).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn into_handles(mut self) -> Vec<ListenerHandle> {
        std::mem::take(&mut self.handles)
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        self.close_all();
    }
}
