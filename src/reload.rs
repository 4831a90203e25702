//! Reconfiguration — turn a validated config into the live routing snapshot
//!
//! The reload path: build a new snapshot (reusing registry backends whose
//! identity is unchanged), publish it with one atomic swap, converge the
//! listener set, then prune registry entries no snapshot references. A cold
//! start skips pruning and starts the health loop instead. In-flight
//! requests keep the snapshot they loaded; an unchanged backend's liveness
//! is never reset.

use crate::backend::{backend_address, Backend, BackendKey};
use crate::balancer::{create_balancer, Balancer};
use crate::cache::LruCache;
use crate::config::{CacheKind, Config};
use crate::error::Result;
use crate::health;
use crate::listener;
use crate::state::{ConfigSnapshot, RouteKey, RuntimeState};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use url::Url;

/// Apply a validated configuration to the running process.
pub async fn apply(state: &Arc<RuntimeState>, config: &Config, cold_start: bool) -> Result<()> {
    let (snapshot, new_ports) = build_snapshot(state, config)?;
    let routes = snapshot.router.len();
    state.publish(snapshot);
    tracing::info!(routes, services = config.services.len(), "Routing snapshot published");

    listener::converge(state, &new_ports).await;

    if cold_start {
        let task = health::spawn(state.clone());
        state.set_health_task(task);
        tracing::info!("Health checks started");
    } else {
        prune_registry(state);
    }
    Ok(())
}

/// Build the snapshot and the set of ports it needs.
///
/// Backends are looked up in the registry by `(address, health_uri)` and
/// reused when present so their liveness and counters survive the reload.
pub fn build_snapshot(
    state: &RuntimeState,
    config: &Config,
) -> Result<(ConfigSnapshot, HashSet<u16>)> {
    let mut router: HashMap<RouteKey, Arc<dyn Balancer>> = HashMap::new();
    let mut new_ports = HashSet::new();

    for svc in &config.services {
        let mut backends = Vec::with_capacity(svc.upstreams.len());
        {
            let mut registry = state.registry().write().unwrap();
            for upstream in &svc.upstreams {
                let url = Url::parse(&upstream.host)?;
                let key = BackendKey {
                    address: backend_address(&url),
                    health_uri: upstream.health_uri.clone(),
                };
                let backend = registry
                    .entry(key)
                    .or_insert_with(|| {
                        Arc::new(Backend::new(url, upstream.health_uri.clone()))
                    })
                    .clone();
                backends.push(backend);
            }
        }

        let lb = create_balancer(&svc.name, svc.balancer, svc.listen_port, backends);
        new_ports.insert(svc.listen_port);

        for link in &svc.hosts {
            let parsed = Url::parse(link)?;
            let route = RouteKey {
                domain: parsed.authority().to_string(),
                path_prefix: parsed.path().to_string(),
                port: svc.listen_port,
            };
            router.insert(route, lb.clone());
        }
    }

    let cache = if config.cache.enabled && config.cache.kind == CacheKind::Lru {
        Some(Arc::new(LruCache::new(
            config.cache.capacity,
            config.cache.max_size,
            config.cache.ttl,
        )))
    } else {
        None
    };

    Ok((ConfigSnapshot { router, cache }, new_ports))
}

/// Drop registry entries that no balancer in the current snapshot references.
pub fn prune_registry(state: &RuntimeState) {
    let snapshot = state.snapshot();
    let mut active = HashSet::new();
    for lb in snapshot.router.values() {
        for backend in lb.backends() {
            active.insert(backend.key());
        }
    }

    let mut registry = state.registry().write().unwrap();
    registry.retain(|key, _| {
        let keep = active.contains(key);
        if !keep {
            tracing::info!(address = %key.address, "Cleaning up unused backend");
        }
        keep
    });
}

/// Process shutdown: stop probing, drain every listener.
pub async fn shutdown(state: &Arc<RuntimeState>) {
    if let Some(task) = state.take_health_task() {
        task.abort();
    }
    listener::shutdown_all(state).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Algorithm;

    fn two_service_config() -> Config {
        let mut config = Config::from_yaml(
            r#"
cache:
  enabled: true
  capacity: 16
  ttl: 60
services:
  - name: root
    listen_port: 8080
    balancer: RoundRobin
    hosts: [http://a.example]
    upstreams:
      - host: http://127.0.0.1:9001
        health_uri: /health
  - name: api
    listen_port: 8080
    balancer: LeastConnections
    hosts: [http://a.example/api]
    upstreams:
      - host: http://127.0.0.1:9002
"#,
        )
        .unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_build_snapshot_routes_and_ports() {
        let state = RuntimeState::new();
        let config = two_service_config();
        let (snapshot, ports) = build_snapshot(&state, &config).unwrap();

        assert_eq!(snapshot.router.len(), 2);
        assert!(snapshot.cache.is_some());
        assert_eq!(ports, HashSet::from([8080]));

        let api_route = RouteKey {
            domain: "a.example".into(),
            path_prefix: "/api".into(),
            port: 8080,
        };
        let lb = snapshot.router.get(&api_route).unwrap();
        assert_eq!(lb.algorithm(), Algorithm::LeastConnections);

        assert_eq!(state.registry().read().unwrap().len(), 2);
    }

    #[test]
    fn test_rebuild_reuses_backends_by_identity() {
        let state = RuntimeState::new();
        let config = two_service_config();

        let (first, _) = build_snapshot(&state, &config).unwrap();
        state.publish(first);
        let before: Vec<_> = {
            let registry = state.registry().read().unwrap();
            registry.values().cloned().collect()
        };
        // a surviving backend keeps its liveness across rebuilds
        before[0].set_health(false);

        let (second, _) = build_snapshot(&state, &config).unwrap();
        state.publish(second);

        let registry = state.registry().read().unwrap();
        assert_eq!(registry.len(), 2);
        for backend in &before {
            let reused = registry.get(&backend.key()).unwrap();
            assert!(Arc::ptr_eq(backend, reused));
        }
        assert!(!before[0].is_alive());
    }

    #[test]
    fn test_prune_removes_orphans() {
        let state = RuntimeState::new();
        let config = two_service_config();
        let (snapshot, _) = build_snapshot(&state, &config).unwrap();
        state.publish(snapshot);
        assert_eq!(state.registry().read().unwrap().len(), 2);

        let mut smaller = config.clone();
        smaller.services.truncate(1);
        let (snapshot, _) = build_snapshot(&state, &smaller).unwrap();
        state.publish(snapshot);
        prune_registry(&state);

        let registry = state.registry().read().unwrap();
        assert_eq!(registry.len(), 1);
        let survivor = registry.keys().next().unwrap();
        assert_eq!(survivor.address, "127.0.0.1:9001");
    }

    #[test]
    fn test_prune_is_idempotent() {
        let state = RuntimeState::new();
        let config = two_service_config();
        let (snapshot, _) = build_snapshot(&state, &config).unwrap();
        state.publish(snapshot);

        prune_registry(&state);
        prune_registry(&state);
        assert_eq!(state.registry().read().unwrap().len(), 2);
    }

    #[test]
    fn test_cache_disabled_means_none() {
        let state = RuntimeState::new();
        let mut config = two_service_config();
        config.cache.enabled = false;
        let (snapshot, _) = build_snapshot(&state, &config).unwrap();
        assert!(snapshot.cache.is_none());
    }
}
