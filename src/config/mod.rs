//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → command-line overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → NodeConfig (validated, immutable)
//!     → handed to the bootstrap orchestrator
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{
    ClusterConfig, ClusterState, CorsConfig, FallbackPolicy, NodeConfig, ObservabilityConfig,
    ProxyMode, ProxySettings, TimeoutConfig, TlsConfig,
};
