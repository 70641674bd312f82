//! Middleware shared by every router the node serves.
//!
//! # Responsibilities
//! - Request timeout
//! - Request ID generation and propagation
//! - Request tracing

use std::time::Duration;

use axum::Router;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::request::{propagate_request_id_layer, set_request_id_layer};

/// Wrap `router` with the standard middleware stack.
#[allow(deprecated)]
pub fn layered(router: Router, request_timeout: Duration) -> Router {
    router
        .layer(TimeoutLayer::new(request_timeout))
        .layer(propagate_request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(set_request_id_layer())
}
