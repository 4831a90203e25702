//! Balancer — backend selection algorithms for a service
//!
//! A balancer owns the ordered backend set of one service and picks the next
//! alive backend per request. The closed set of algorithms lives behind the
//! `Balancer` trait so routing snapshots can hold them uniformly.

mod least_connections;
mod round_robin;

pub use least_connections::LeastConnectionsBalancer;
pub use round_robin::RoundRobinBalancer;

use crate::backend::Backend;
use crate::cache::CachedResponse;
use crate::config::Algorithm;
use crate::proxy::{text_response, InboundRequest, ProxyBody};
use http::{Response, StatusCode};
use std::sync::Arc;

/// Backend selection for one service
pub trait Balancer: Send + Sync {
    /// Name of the service this balancer serves
    fn service(&self) -> &str;

    /// Port the service listens on
    fn port(&self) -> u16;

    /// Selection algorithm in use
    fn algorithm(&self) -> Algorithm;

    /// Pick the next alive backend; `None` when all are dead
    fn next_backend(&self) -> Option<Arc<Backend>>;

    /// The current ordered backend set
    fn backends(&self) -> Vec<Arc<Backend>>;

    /// Replace the backend set
    fn set_backends(&self, backends: Vec<Arc<Backend>>);
}

/// Build a balancer of the requested algorithm.
pub fn create_balancer(
    service: &str,
    algorithm: Algorithm,
    port: u16,
    backends: Vec<Arc<Backend>>,
) -> Arc<dyn Balancer> {
    match algorithm {
        Algorithm::RoundRobin => Arc::new(RoundRobinBalancer::new(service, port, backends)),
        Algorithm::LeastConnections => {
            Arc::new(LeastConnectionsBalancer::new(service, port, backends))
        }
    }
}

/// Holds the chosen backend's in-flight count for the duration of a request.
struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl ConnectionGuard {
    fn new(backend: Arc<Backend>) -> Self {
        backend.increment_connections();
        Self { backend }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.decrement_connections();
    }
}

/// Select a backend and forward the request to it.
///
/// Answers 503 when no backend is alive. The in-flight counter is released
/// on every exit path, including cancellation.
pub async fn serve_proxy(
    balancer: &dyn Balancer,
    req: &InboundRequest,
) -> (Response<ProxyBody>, Option<CachedResponse>) {
    let Some(backend) = balancer.next_backend() else {
        tracing::error!(
            service = balancer.service(),
            "Request dropped: no healthy servers available"
        );
        return (
            text_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service Unavailable: No healthy servers available",
            ),
            None,
        );
    };

    let _guard = ConnectionGuard::new(backend.clone());
    tracing::info!(backend = backend.address(), "Request forwarded");
    backend.serve(req).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method, Uri};
    use http_body_util::BodyExt;
    use url::Url;

    pub(crate) fn make_backends(urls: &[&str]) -> Vec<Arc<Backend>> {
        urls.iter()
            .map(|url| {
                Arc::new(Backend::new(
                    Url::parse(url).unwrap(),
                    "/".to_string(),
                ))
            })
            .collect()
    }

    fn dummy_request() -> InboundRequest {
        InboundRequest {
            method: Method::GET,
            uri: Uri::from_static("/"),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client_addr: "127.0.0.1:40000".parse().unwrap(),
        }
    }

    #[test]
    fn test_factory_round_robin() {
        let lb = create_balancer("svc", Algorithm::RoundRobin, 80, make_backends(&[]));
        assert_eq!(lb.algorithm(), Algorithm::RoundRobin);
        assert_eq!(lb.port(), 80);
        assert_eq!(lb.service(), "svc");
    }

    #[test]
    fn test_factory_least_connections() {
        let lb = create_balancer("svc", Algorithm::LeastConnections, 81, make_backends(&[]));
        assert_eq!(lb.algorithm(), Algorithm::LeastConnections);
        assert_eq!(lb.port(), 81);
    }

    #[tokio::test]
    async fn test_serve_proxy_all_dead_503() {
        let backends = make_backends(&["http://127.0.0.1:9001", "http://127.0.0.1:9002"]);
        for backend in &backends {
            backend.set_health(false);
        }
        let lb = create_balancer("svc", Algorithm::RoundRobin, 80, backends);

        let (response, served) = serve_proxy(lb.as_ref(), &dummy_request()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(served.is_none());

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            body,
            Bytes::from("Service Unavailable: No healthy servers available")
        );
    }

    #[tokio::test]
    async fn test_serve_proxy_releases_counter_on_error() {
        // port 9 is unreachable, so the forward fails with 502 but the
        // in-flight counter must still return to zero
        let backends = make_backends(&["http://127.0.0.1:9"]);
        let lb = create_balancer("svc", Algorithm::RoundRobin, 80, backends.clone());

        let (response, served) = serve_proxy(lb.as_ref(), &dummy_request()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(served.is_none());
        assert_eq!(backends[0].active_connections(), 0);
    }
}
