//! Metrics collection and exposition.
//!
//! # Metrics
//! - `clusterd_proxy_requests_total` (counter): forwarded requests by method, status
//! - `clusterd_proxy_request_duration_seconds` (histogram): forwarding latency
//! - `clusterd_proxy_refresh_total` (counter): membership refreshes by outcome
//! - `clusterd_open_listeners` (gauge): bound listeners by role
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - The Prometheus exporter is optional and serves its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), std::io::Error> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| std::io::Error::other(format!("Failed to install Prometheus exporter: {}", e)))?;

    tracing::info!(metrics_addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}

/// Record one forwarded request.
pub fn record_proxied_request(method: &str, status: u16, start_time: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("clusterd_proxy_requests_total", &labels).increment(1);
    metrics::histogram!("clusterd_proxy_request_duration_seconds", &labels)
        .record(start_time.elapsed().as_secs_f64());
}

/// Record the outcome of a membership refresh.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("clusterd_proxy_refresh_total", "outcome" => outcome).increment(1);
}
