//! Resilience helpers.
//!
//! # Design Decisions
//! - Polling of remote services (discovery) is bounded; no endless retry loops
//! - Jittered backoff prevents thundering herd when a whole cluster boots at once

pub mod backoff;
