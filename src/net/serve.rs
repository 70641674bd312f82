//! Supervised serving of listener sets.
//!
//! # Responsibilities
//! - Run one serving task per listener (plain via `axum::serve`, TLS via
//!   `axum-server`)
//! - Stop every serving loop when the shared close signal is raised
//! - Report why each task ended
//!
//! # Design Decisions
//! - A task that ends before the close signal is an unexpected exit; siblings
//!   keep serving
//! - The close signal is a `watch` flag so late subscribers still see it

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};

use crate::lifecycle::interrupt::InterruptHandler;
use crate::net::listener::{record_closed, ListenerHandle, Role};

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("serving failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("serving task panicked")]
    Panicked,
}

/// Why a serving task ended.
#[derive(Debug)]
pub struct ServeExit {
    pub url: String,
    pub role: Role,
    /// The close signal was raised before the loop ended.
    pub expected: bool,
    pub result: Result<(), ServeError>,
}

/// Group of serving tasks sharing one close signal.
pub struct ServeGroup {
    tasks: JoinSet<ServeExit>,
    names: HashMap<Id, (String, Role, SocketAddr)>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl Default for ServeGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl ServeGroup {
    pub fn new() -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            tasks: JoinSet::new(),
            names: HashMap::new(),
            close_tx: Arc::new(close_tx),
        }
    }

    /// Start serving `router` on the listener.
    pub fn spawn(&mut self, handle: ListenerHandle, router: Router) {
        let url = handle.url().to_string();
        let role = handle.role();
        let addr = handle.local_addr();
        let close_rx = self.close_tx.subscribe();
        let (socket, tls) = handle.into_parts();

        let task_url = url.clone();
        let abort = self.tasks.spawn(async move {
            let closed = close_rx.clone();
            tracing::debug!(address = %addr, role = %role, "Serving");
            let result = match tls {
                None => serve_plain(socket, router, close_rx).await,
                Some(config) => serve_tls(socket, config, router, close_rx).await,
            };
            let expected = *closed.borrow();
            record_closed(addr, role);
            ServeExit {
                url: task_url,
                role,
                expected,
                result: result.map_err(ServeError::from),
            }
        });
        self.names.insert(abort.id(), (url, role, addr));
    }

    /// Interrupt handler that raises the close signal.
    pub fn closer(&self) -> InterruptHandler {
        let close_tx = self.close_tx.clone();
        Box::new(move || {
            tracing::info!("Closing listeners");
            close_tx.send_replace(true);
        })
    }

    fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Wait for the next serving task to end. `None` once all have ended.
    pub async fn next_exit(&mut self) -> Option<ServeExit> {
        let joined = self.tasks.join_next().await?;
        let exit = match joined {
            Ok(exit) => {
                self.names
                    .retain(|_, (url, role, _)| !(url == &exit.url && *role == exit.role));
                exit
            }
            Err(e) => {
                let (url, role) = match self.names.remove(&e.id()) {
                    Some((url, role, addr)) => {
                        record_closed(addr, role);
                        (url, role)
                    }
                    None => (String::from("unknown"), Role::Client),
                };
                ServeExit {
                    url,
                    role,
                    expected: self.is_closed(),
                    result: Err(ServeError::Panicked),
                }
            }
        };
        Some(exit)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

async fn wait_closed(mut close_rx: watch::Receiver<bool>) {
    // A dropped sender also ends serving.
    let _ = close_rx.wait_for(|closed| *closed).await;
}

async fn serve_plain(
    socket: std::net::TcpListener,
    router: Router,
    close_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::from_std(socket)?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_closed(close_rx))
    .await
}

async fn serve_tls(
    socket: std::net::TcpListener,
    config: axum_server::tls_rustls::RustlsConfig,
    router: Router,
    close_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        wait_closed(close_rx).await;
        shutdown.graceful_shutdown(None);
    });

    axum_server::from_tcp_rustls(socket, config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await
}
