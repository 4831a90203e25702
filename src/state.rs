//! Runtime state — the three shared pieces that outlive any one request
//!
//! The routing snapshot is an atomically swapped immutable value: request
//! handlers take one load and never synchronize further. The listener map and
//! backend registry are touched only on the reload path and by the health
//! loop, under their own locks.

use crate::backend::{Backend, BackendKey};
use crate::balancer::Balancer;
use crate::cache::LruCache;
use crate::listener::ListenerHandle;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Identifies one balancer binding: inbound domain, path prefix, port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub domain: String,
    pub path_prefix: String,
    pub port: u16,
}

/// Immutable bundle of routing table and cache, swapped wholesale on reload
pub struct ConfigSnapshot {
    /// Route → balancer mapping
    pub router: HashMap<RouteKey, Arc<dyn Balancer>>,
    /// Response cache, when enabled
    pub cache: Option<Arc<LruCache>>,
}

impl ConfigSnapshot {
    /// A snapshot with no routes and no cache (pre-cold-start placeholder)
    pub fn empty() -> Self {
        Self {
            router: HashMap::new(),
            cache: None,
        }
    }
}

/// Process-wide runtime state
pub struct RuntimeState {
    /// Current snapshot; single writer (the reconfigurer), many readers
    snapshot: ArcSwap<ConfigSnapshot>,
    /// Running listeners by port; locked only during reload convergence
    listeners: Mutex<HashMap<u16, ListenerHandle>>,
    /// Backends by identity, surviving reloads
    registry: RwLock<HashMap<BackendKey, Arc<Backend>>>,
    /// Handle of the health probe loop, set at cold start
    health_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(ConfigSnapshot::empty()),
            listeners: Mutex::new(HashMap::new()),
            registry: RwLock::new(HashMap::new()),
            health_task: std::sync::Mutex::new(None),
        }
    }

    /// One atomic load of the current snapshot
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.load_full()
    }

    /// Atomically replace the snapshot; in-flight requests keep the old one
    pub fn publish(&self, snapshot: ConfigSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn listeners(&self) -> &Mutex<HashMap<u16, ListenerHandle>> {
        &self.listeners
    }

    pub fn registry(&self) -> &RwLock<HashMap<BackendKey, Arc<Backend>>> {
        &self.registry
    }

    pub fn set_health_task(&self, task: JoinHandle<()>) {
        *self.health_task.lock().unwrap() = Some(task);
    }

    pub fn take_health_task(&self) -> Option<JoinHandle<()>> {
        self.health_task.lock().unwrap().take()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}
