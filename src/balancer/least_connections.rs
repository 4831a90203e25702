//! Least-connections selection — fewest in-flight requests wins

use super::Balancer;
use crate::backend::Backend;
use crate::config::Algorithm;
use std::sync::{Arc, RwLock};

/// Scans the backend set for the alive backend with the fewest in-flight
/// requests; ties go to the first in declared order.
pub struct LeastConnectionsBalancer {
    service: String,
    port: u16,
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl LeastConnectionsBalancer {
    pub fn new(service: &str, port: u16, backends: Vec<Arc<Backend>>) -> Self {
        Self {
            service: service.to_string(),
            port,
            backends: RwLock::new(backends),
        }
    }
}

impl Balancer for LeastConnectionsBalancer {
    fn service(&self) -> &str {
        &self.service
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::LeastConnections
    }

    fn next_backend(&self) -> Option<Arc<Backend>> {
        let backends = self.backends.read().unwrap();
        let mut selected: Option<&Arc<Backend>> = None;
        let mut min_connections = 0;
        for backend in backends.iter() {
            if !backend.is_alive() {
                continue;
            }
            let active = backend.active_connections();
            if selected.is_none() || active < min_connections {
                min_connections = active;
                selected = Some(backend);
            }
        }
        selected.cloned()
    }

    fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().unwrap().clone()
    }

    fn set_backends(&self, backends: Vec<Arc<Backend>>) {
        *self.backends.write().unwrap() = backends;
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::make_backends;
    use super::*;

    #[test]
    fn test_picks_fewest_connections() {
        let backends = make_backends(&["http://a:8001", "http://b:8002"]);
        backends[0].increment_connections();
        backends[0].increment_connections();
        let lb = LeastConnectionsBalancer::new("svc", 80, backends);

        assert_eq!(lb.next_backend().unwrap().address(), "b:8002");
    }

    #[test]
    fn test_tie_goes_to_first_declared() {
        let backends = make_backends(&["http://a:8001", "http://b:8002"]);
        let lb = LeastConnectionsBalancer::new("svc", 80, backends);
        assert_eq!(lb.next_backend().unwrap().address(), "a:8001");
    }

    #[test]
    fn test_skips_dead_even_if_idle() {
        let backends = make_backends(&["http://a:8001", "http://b:8002"]);
        backends[0].set_health(false);
        backends[1].increment_connections();
        let lb = LeastConnectionsBalancer::new("svc", 80, backends);

        assert_eq!(lb.next_backend().unwrap().address(), "b:8002");
    }

    #[test]
    fn test_all_dead_returns_none() {
        let backends = make_backends(&["http://a:8001"]);
        backends[0].set_health(false);
        let lb = LeastConnectionsBalancer::new("svc", 80, backends);
        assert!(lb.next_backend().is_none());
    }

    #[test]
    fn test_selection_tracks_minimum() {
        let backends = make_backends(&[
            "http://a:8001",
            "http://b:8002",
            "http://c:8003",
        ]);
        backends[0].increment_connections();
        backends[2].increment_connections();
        backends[2].increment_connections();
        let lb = LeastConnectionsBalancer::new("svc", 80, backends.clone());

        let chosen = lb.next_backend().unwrap();
        let min = backends
            .iter()
            .map(|b| b.active_connections())
            .min()
            .unwrap();
        assert_eq!(chosen.active_connections(), min);
        assert_eq!(chosen.address(), "b:8002");
    }

    #[test]
    fn test_set_backends_replaces_pool() {
        let lb = LeastConnectionsBalancer::new("svc", 80, make_backends(&["http://a:8001"]));
        lb.set_backends(make_backends(&["http://z:9009"]));
        assert_eq!(lb.next_backend().unwrap().address(), "z:9009");
    }
}
