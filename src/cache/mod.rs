//! Response cache — bounded LRU store for safe, idempotent responses
//!
//! Only GET/HEAD responses are cached. The key is derived from the request
//! (method, listening port, host, path, raw query); storage honors upstream
//! `Cache-Control` directives.

mod lru;

pub use lru::LruCache;

use bytes::Bytes;
use http::header::CACHE_CONTROL;
use http::{HeaderMap, Method, StatusCode};
use std::time::{SystemTime, UNIX_EPOCH};

/// A response captured for replay: status, full header multimap, body bytes
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers, order and duplicates preserved
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

/// Build the cache key for a request handled on `port`.
///
/// Format: `METHOD_port_hostpath` with the raw query appended after `?`
/// when present.
pub fn cache_key(method: &Method, port: u16, host: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{}_{}_{}{}?{}", method, port, host, path, q),
        _ => format!("{}_{}_{}{}", method, port, host, path),
    }
}

/// Decide whether a response may be stored, and for how long.
///
/// Returns `None` when `Cache-Control` carries `no-store`, `no-cache`,
/// `private` or `max-age=0`; otherwise `Some(ttl)` where a positive
/// `max-age=N` overrides `default_ttl`.
pub fn freshness_ttl(headers: &HeaderMap, default_ttl: i64) -> Option<i64> {
    let mut ttl = default_ttl;
    for value in headers.get_all(CACHE_CONTROL) {
        let Ok(value) = value.to_str() else { continue };
        for directive in value.split(',') {
            let directive = directive.trim();
            if directive.eq_ignore_ascii_case("no-store")
                || directive.eq_ignore_ascii_case("no-cache")
                || directive.eq_ignore_ascii_case("private")
            {
                return None;
            }
            if let Some(n) = directive.strip_prefix("max-age=") {
                if let Ok(n) = n.parse::<i64>() {
                    if n == 0 {
                        return None;
                    }
                    ttl = n;
                }
            }
        }
    }
    Some(ttl)
}

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
