pub mod gateway;
pub mod jwt;
pub mod middleware;
pub mod oauth;
pub mod password;
pub mod validation;

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Address a request is attributed to for throttling and login stamps.
///
/// Forwarding headers are client-controlled unless a proxy rewrites them, so they
/// only count when `trust_proxy_headers` is set. Otherwise the TCP peer wins.
#[must_use]
pub fn client_origin(
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    trust_proxy_headers: bool,
) -> Option<String> {
    let forwarded = if trust_proxy_headers {
        extract_client_ip(headers)
    } else {
        None
    };
    forwarded.or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Extract the client IP address from request headers.
///
/// Checks `X-Forwarded-For` first (for reverse proxies),
/// then falls back to `X-Real-IP`.
#[must_use]
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string)
        })
}
