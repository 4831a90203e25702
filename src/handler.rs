//! Request handler — routes one inbound request on one port
//!
//! Matches `(host, port, longest path prefix)` against the current snapshot,
//! consults the response cache for GET/HEAD, dispatches to the service's
//! balancer and stores cacheable responses on the way out.

use crate::balancer::{self, Balancer};
use crate::cache::{cache_key, freshness_ttl, unix_now, CachedResponse};
use crate::proxy::{full_body, text_response, InboundRequest, ProxyBody};
use crate::state::{RouteKey, RuntimeState};
use bytes::Bytes;
use http::{header, Method, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::Request;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Handle one request accepted on `port`. Never fails: every error becomes
/// an HTTP status.
pub async fn handle(
    state: Arc<RuntimeState>,
    port: u16,
    client_addr: SocketAddr,
    req: Request<Incoming>,
) -> Response<ProxyBody> {
    let (parts, body) = req.into_parts();
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    // HTTP/1.1 carries the authority in the Host header, h2c in the URI
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();
    let host = strip_port(&host).to_string();
    let path = parts.uri.path().to_string();

    let snapshot = state.snapshot();

    let Some(lb) = match_route(&snapshot.router, &host, &path, port) else {
        tracing::error!(
            host,
            path,
            port,
            "Request with unrecognised domain or path received, please update the config file or DNS"
        );
        return text_response(StatusCode::NOT_FOUND, "Service not found");
    };

    let cacheable = parts.method == Method::GET || parts.method == Method::HEAD;
    let cache = if cacheable {
        snapshot.cache.clone()
    } else {
        None
    };
    let key = cache
        .as_ref()
        .map(|_| cache_key(&parts.method, port, &host, &path, parts.uri.query()));

    if let (Some(cache), Some(key)) = (&cache, &key) {
        if let Some(cached) = cache.get(key) {
            tracing::info!(key, "Cache hit");
            return replay_cached(cached);
        }
    }

    let inbound = InboundRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body: body_bytes,
        client_addr,
    };
    let (response, served) = balancer::serve_proxy(lb.as_ref(), &inbound).await;

    if let (Some(cache), Some(key), Some(served)) = (cache, key, served) {
        if let Some(ttl) = freshness_ttl(&served.headers, cache.ttl()) {
            let expires_at = unix_now() + ttl;
            tracing::info!(key, "Response cached");
            cache.set(&key, served, expires_at);
        }
    }

    response
}

/// Pick the balancer whose route matches `(host, port)` with the longest
/// path prefix of `path`.
pub fn match_route<'a>(
    router: &'a HashMap<RouteKey, Arc<dyn Balancer>>,
    host: &str,
    path: &str,
    port: u16,
) -> Option<&'a Arc<dyn Balancer>> {
    let mut best: Option<&Arc<dyn Balancer>> = None;
    let mut longest: Option<usize> = None;
    for (key, lb) in router {
        if key.domain != host || key.port != port {
            continue;
        }
        if path.starts_with(&key.path_prefix)
            && longest.map_or(true, |len| key.path_prefix.len() > len)
        {
            longest = Some(key.path_prefix.len());
            best = Some(lb);
        }
    }
    best
}

/// Drop a trailing `:port` from a Host value, leaving bracketed IPv6
/// literals intact.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        if let Some(end) = host.find(']') {
            return &host[..=end];
        }
        return host;
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn replay_cached(cached: CachedResponse) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(cached.body));
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached.headers;
    response
}
