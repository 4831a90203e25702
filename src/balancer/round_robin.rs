//! Round-robin selection with dead-backend skip

use super::Balancer;
use crate::backend::Backend;
use crate::config::Algorithm;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Rotates through the backend set, probing forward past dead entries.
pub struct RoundRobinBalancer {
    service: String,
    port: u16,
    counter: AtomicU64,
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl RoundRobinBalancer {
    pub fn new(service: &str, port: u16, backends: Vec<Arc<Backend>>) -> Self {
        Self {
            service: service.to_string(),
            port,
            counter: AtomicU64::new(0),
            backends: RwLock::new(backends),
        }
    }
}

impl Balancer for RoundRobinBalancer {
    fn service(&self) -> &str {
        &self.service
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::RoundRobin
    }

    fn next_backend(&self) -> Option<Arc<Backend>> {
        let backends = self.backends.read().unwrap();
        let n = backends.len() as u64;
        if n == 0 {
            return None;
        }
        let start = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        for i in 0..n {
            let idx = (start.wrapping_add(i) % n) as usize;
            if backends[idx].is_alive() {
                return Some(backends[idx].clone());
            }
        }
        None
    }

    fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().unwrap().clone()
    }

    fn set_backends(&self, backends: Vec<Arc<Backend>>) {
        *self.backends.write().unwrap() = backends;
    }
}
