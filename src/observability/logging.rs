//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Turn the configured level and per-module levels into filter directives
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over the configuration when set
//! - A bad per-module level string is reported and ignored, never fatal

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

const CRATE: &str = "clusterd";
const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LevelError {
    #[error("expected module=LEVEL, got {0:?}")]
    Malformed(String),

    #[error("unknown log level {level:?} for module {module:?}")]
    UnknownLevel { module: String, level: String },
}

/// Parse `"module=LEVEL,..."` into `clusterd::module=level` directives.
pub fn parse_package_levels(spec: &str) -> Result<Vec<String>, LevelError> {
    let mut directives = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (module, level) = entry
            .split_once('=')
            .ok_or_else(|| LevelError::Malformed(entry.to_string()))?;
        let module = module.trim();
        let level = level.trim().to_ascii_lowercase();
        if module.is_empty() {
            return Err(LevelError::Malformed(entry.to_string()));
        }
        if !LEVELS.contains(&level.as_str()) {
            return Err(LevelError::UnknownLevel {
                module: module.to_string(),
                level,
            });
        }

        let target = if module == "*" {
            CRATE.to_string()
        } else {
            format!("{}::{}", CRATE, module.replace('/', "::"))
        };
        directives.push(format!("{}={}", target, level));
    }
    Ok(directives)
}

/// Filter directives for a configuration. Also returns a per-module parse
/// problem, which callers log once the subscriber is up.
pub fn filter_directives(config: &ObservabilityConfig) -> (String, Option<LevelError>) {
    let level = if config.debug { "debug" } else { config.log_level.as_str() };
    let mut directives = vec![level.to_string(), format!("tower_http={}", level)];

    let problem = match parse_package_levels(&config.log_package_levels) {
        Ok(extra) => {
            directives.extend(extra);
            None
        }
        Err(e) => Some(e),
    };
    (directives.join(","), problem)
}

/// Install the global subscriber.
pub fn init_logging(config: &ObservabilityConfig) {
    let (directives, problem) = filter_directives(config);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(e) = problem {
        tracing::warn!(
            levels = %config.log_package_levels,
            error = %e,
            "Couldn't parse log package levels, keeping defaults"
        );
    }
}
