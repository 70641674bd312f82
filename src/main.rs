//! clusterd: cluster node bootstrap.
//!
//! Starts a node either as a cluster member or as a forwarding proxy.
//!
//! ```text
//!   config file + flags
//!          │
//!          ▼
//!   ┌─────────────┐   data dir    ┌──────────────┐   discovery / DNS / static
//!   │  bootstrap  │──────────────▶│ mode resolve │──────────────────────────┐
//!   └─────────────┘               └──────────────┘                          │
//!          │                                                                 ▼
//!          │            ┌──────────────────────┐      ┌───────────────────────────┐
//!          ├───────────▶│ member: peer+client  │      │ proxy: client listeners,  │
//!          │            │ listeners, server    │─────▶│ refresher, forwarding     │
//!          │            └──────────────────────┘ full └───────────────────────────┘
//!          ▼
//!   interrupt registry ◀── SIGINT / SIGTERM
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use clusterd::config::loader::{check_config, load_config};
use clusterd::config::{ConfigError, NodeConfig, ProxyMode};
use clusterd::lifecycle::{Bootstrap, BootstrapError, Collaborators, InterruptRegistry};
use clusterd::observability::{init_logging, init_metrics};

#[derive(Parser)]
#[command(name = "clusterd")]
#[command(version, about = "Cluster node bootstrap: run as a member or as a proxy", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Member name, overrides the configuration file
    #[arg(long)]
    name: Option<String>,

    /// Data directory, overrides the configuration file
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Proxy mode, overrides the configuration file
    #[arg(long, value_enum)]
    proxy: Option<ProxyArg>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProxyArg {
    Off,
    On,
    Readonly,
}

impl From<ProxyArg> for ProxyMode {
    fn from(arg: ProxyArg) -> Self {
        match arg {
            ProxyArg::Off => ProxyMode::Off,
            ProxyArg::On => ProxyMode::On,
            ProxyArg::Readonly => ProxyMode::Readonly,
        }
    }
}

fn load(cli: &Cli) -> Result<NodeConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => NodeConfig::default(),
    };

    if let Some(name) = &cli.name {
        config.name = name.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(mode) = cli.proxy {
        config.proxy.mode = mode.into();
    }
    if cli.debug {
        config.observability.debug = true;
    }

    check_config(&config)?;
    Ok(config)
}

fn report_duplicate_id(config: &NodeConfig, err: &BootstrapError) {
    tracing::error!(error = %err, "Member has already registered with the discovery service");
    tracing::error!(
        name = %config.name,
        token = config.cluster.discovery.as_deref().unwrap_or_default(),
        data_dir = %config.data_dir().display(),
        "No valid cluster state was found in the data dir. Check the data dir path if the \
         previous bootstrap succeeded, or use a new discovery token if it failed."
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("clusterd: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), name = %config.name, "clusterd starting");

    if let Some(address) = &config.observability.metrics_address {
        let started = address
            .parse::<SocketAddr>()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
            .and_then(init_metrics);
        if let Err(e) = started {
            tracing::error!(metrics_address = %address, error = %e, "Failed to start metrics exporter");
            std::process::exit(1);
        }
    }

    let registry = InterruptRegistry::new();
    let bootstrap = Bootstrap::new(config.clone(), registry.clone(), Collaborators::standard());
    let running = match bootstrap.start().await {
        Ok(running) => running,
        Err(e) => {
            if e.is_duplicate_id() {
                report_duplicate_id(&config, &e);
            } else {
                tracing::error!(error = %e, fault = ?e.fault(), "Startup failed");
            }
            std::process::exit(1);
        }
    };

    if let Err(e) = registry.handle_interrupts() {
        tracing::error!(error = %e, "Failed to install signal handlers");
        registry.stop();
        registry.exit(1);
    }

    match running.wait().await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            registry.exit(0)
        }
        Err(e) => {
            tracing::error!(error = %e, "Serving failed");
            registry.exit(1)
        }
    }
}
