//! Forwarding handler.
//!
//! # Responsibilities
//! - Buffer the request body (bounded) so it can be replayed
//! - Forward to the director's endpoints in turn until one answers
//! - Restrict a read-only proxy to GET requests
//!
//! # Design Decisions
//! - Only network errors move on to the next endpoint; any HTTP response,
//!   including 5xx, is passed through as-is
//! - Hop-by-hop headers never cross the proxy

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::http::RequestIdExt;
use crate::observability::metrics;
use crate::proxy::director::Director;

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

/// Application state injected into the forwarding handler.
#[derive(Clone)]
pub struct ProxyState {
    pub director: Arc<Director>,
    pub client: reqwest::Client,
    pub max_body_bytes: usize,
}

/// Router forwarding every request; read-only proxies reject non-GET.
pub fn router(state: ProxyState, readonly: bool) -> Router {
    let limit = RequestBodyLimitLayer::new(state.max_body_bytes);
    let router = Router::new().fallback(forward).with_state(state).layer(limit);
    if readonly {
        router.layer(middleware::from_fn(readonly_guard))
    } else {
        router
    }
}

async fn readonly_guard(request: Request, next: Next) -> Response {
    if request.method() != Method::GET {
        return (StatusCode::NOT_IMPLEMENTED, "proxy: method not allowed in read-only mode")
            .into_response();
    }
    next.run(request).await
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

async fn forward(
    State(state): State<ProxyState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let start_time = Instant::now();
    let request_id = request.request_id().map(str::to_owned);
    let (parts, body) = request.into_parts();
    let method = parts.method.clone();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = ?request_id, error = %e, "Proxy: failed to read request body");
            metrics::record_proxied_request(method.as_str(), 413, start_time);
            return (StatusCode::PAYLOAD_TOO_LARGE, "proxy: request body too large").into_response();
        }
    };

    let endpoints = state.director.available().await;
    if endpoints.is_empty() {
        tracing::warn!("Proxy: zero endpoints currently available");
        metrics::record_proxied_request(method.as_str(), 503, start_time);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "proxy: zero endpoints currently available",
        )
            .into_response();
    }

    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    if let Ok(value) = HeaderValue::from_str(&remote.ip().to_string()) {
        headers.append(HeaderName::from_static("x-forwarded-for"), value);
    }

    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    for endpoint in &endpoints {
        let url = format!("{}{}", endpoint.url, path);
        let result = state
            .client
            .request(method.clone(), &url)
            .headers(headers.clone())
            .body(body.clone())
            .send()
            .await;

        match result {
            Ok(upstream) => {
                endpoint.mark_ok();
                let status = upstream.status();
                let mut response_headers = upstream.headers().clone();
                strip_hop_by_hop(&mut response_headers);

                metrics::record_proxied_request(method.as_str(), status.as_u16(), start_time);
                let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
                *response.status_mut() = status;
                *response.headers_mut() = response_headers;
                return response;
            }
            Err(e) => {
                tracing::warn!(
                    request_id = ?request_id,
                    endpoint = %endpoint.url,
                    error = %e,
                    "Proxy: failed to reach endpoint"
                );
                endpoint.mark_failed();
            }
        }
    }

    let message = format!(
        "proxy: unable to get response from {} endpoint(s)",
        endpoints.len()
    );
    tracing::warn!(request_id = ?request_id, "{}", message);
    metrics::record_proxied_request(method.as_str(), 502, start_time);
    (StatusCode::BAD_GATEWAY, message).into_response()
}
