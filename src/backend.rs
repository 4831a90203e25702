//! Backend — per-upstream mutable state that survives configuration reloads
//!
//! A backend pairs one upstream URL with its liveness flag, its in-flight
//! request counter and a bound reverse-proxy engine. Backends are identified
//! by `(address, health_uri)`; the reconfigurer reuses the existing entry for
//! an unchanged key so liveness and counters persist across reloads.

use crate::cache::CachedResponse;
use crate::proxy::{InboundRequest, ProxyBody, ReverseProxy};
use http::Response;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use url::Url;

/// Registry identity of a backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendKey {
    /// Upstream authority plus path, e.g. `127.0.0.1:9001/api`
    pub address: String,
    /// Health probe path
    pub health_uri: String,
}

/// One upstream target with mutable runtime state
pub struct Backend {
    url: Url,
    address: String,
    health_uri: String,
    proxy: ReverseProxy,
    /// Starts true on registration; mutated only by the health checker
    live: AtomicBool,
    active_connections: AtomicI64,
}

impl Backend {
    /// Create a backend for `url`, initially alive with no connections.
    pub fn new(url: Url, health_uri: String) -> Self {
        let address = backend_address(&url);
        Self {
            proxy: ReverseProxy::new(url.clone()),
            url,
            address,
            health_uri,
            live: AtomicBool::new(true),
            active_connections: AtomicI64::new(0),
        }
    }

    /// Upstream authority plus path
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Health probe path for this backend
    pub fn health_uri(&self) -> &str {
        &self.health_uri
    }

    /// Parsed upstream URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Registry key identifying this backend across reloads
    pub fn key(&self) -> BackendKey {
        BackendKey {
            address: self.address.clone(),
            health_uri: self.health_uri.clone(),
        }
    }

    /// Forward a request through the bound reverse proxy.
    pub async fn serve(
        &self,
        req: &InboundRequest,
    ) -> (Response<ProxyBody>, Option<CachedResponse>) {
        self.proxy.serve_request(req).await
    }

    /// Current liveness as set by the health checker
    pub fn is_alive(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    /// Flip the liveness flag
    pub fn set_health(&self, alive: bool) {
        self.live.store(alive, Ordering::Relaxed);
    }

    /// Number of in-flight requests
    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Record a request starting
    pub fn increment_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request finishing
    pub fn decrement_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("address", &self.address)
            .field("health_uri", &self.health_uri)
            .field("live", &self.is_alive())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

/// Authority plus path of an upstream URL, with a bare `/` path elided.
pub fn backend_address(url: &Url) -> String {
    match url.path() {
        "/" => url.authority().to_string(),
        path => format!("{}{}", url.authority(), path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> Backend {
        Backend::new(Url::parse(url).unwrap(), "/health".to_string())
    }

    #[test]
    fn test_address_without_path() {
        let b = backend("http://127.0.0.1:9001");
        assert_eq!(b.address(), "127.0.0.1:9001");
    }

    #[test]
    fn test_address_with_path() {
        let b = backend("http://127.0.0.1:9001/api");
        assert_eq!(b.address(), "127.0.0.1:9001/api");
    }

    #[test]
    fn test_starts_alive() {
        let b = backend("http://127.0.0.1:9001");
        assert!(b.is_alive());
        b.set_health(false);
        assert!(!b.is_alive());
        b.set_health(true);
        assert!(b.is_alive());
    }

    #[test]
    fn test_connection_counter() {
        let b = backend("http://127.0.0.1:9001");
        assert_eq!(b.active_connections(), 0);
        b.increment_connections();
        b.increment_connections();
        assert_eq!(b.active_connections(), 2);
        b.decrement_connections();
        assert_eq!(b.active_connections(), 1);
    }

    #[test]
    fn test_key_identity() {
        let a = backend("http://127.0.0.1:9001");
        let b = backend("http://127.0.0.1:9001");
        assert_eq!(a.key(), b.key());

        let c = Backend::new(
            Url::parse("http://127.0.0.1:9001").unwrap(),
            "/other".to_string(),
        );
        assert_ne!(a.key(), c.key());
    }
}
