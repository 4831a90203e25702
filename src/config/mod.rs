//! Configuration types for switchyard
//!
//! The proxy is driven by a single YAML file (`./config.yaml` by default)
//! declaring the response cache and the set of services: which port each
//! service listens on, which inbound host URLs select it, which balancing
//! algorithm it uses, and which upstreams it forwards to.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use url::Url;

use crate::error::{ProxyError, Result};

/// Load balancing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Algorithm {
    /// Rotate through backends, skipping dead ones
    RoundRobin,
    /// Pick the alive backend with the fewest in-flight requests
    LeastConnections,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "RoundRobin"),
            Self::LeastConnections => write!(f, "LeastConnections"),
        }
    }
}

/// Cache eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum CacheKind {
    #[default]
    #[serde(rename = "LRU")]
    Lru,
}

/// Response cache configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Whether the response cache is active
    #[serde(default)]
    pub enabled: bool,

    /// Per-response body byte cap; 0 = no cap
    #[serde(default)]
    pub max_size: u64,

    /// Maximum number of cached entries
    #[serde(default)]
    pub capacity: u64,

    /// Eviction policy
    #[serde(default, rename = "type")]
    pub kind: CacheKind,

    /// Default TTL in seconds for entries without a max-age override
    #[serde(default)]
    pub ttl: u64,
}

/// A single upstream target of a service
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream URL (scheme + authority + optional path)
    pub host: String,

    /// Health probe path; defaults to "/"
    #[serde(default)]
    pub health_uri: String,
}

/// A logical service: one listening port, inbound host URLs, upstreams
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Unique service name
    pub name: String,

    /// Listening port, 1..=65535
    pub listen_port: u16,

    /// Balancing algorithm
    pub balancer: Algorithm,

    /// Inbound host URLs that select this service; path = routing prefix
    pub hosts: Vec<String>,

    /// Upstream targets
    pub upstreams: Vec<UpstreamConfig>,
}

/// Top-level proxy configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Configured services
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl Config {
    /// Read, decode and validate the configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ProxyError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| ProxyError::Config(format!("Failed to parse YAML config: {}", e)))
    }

    /// Validate the configuration, normalizing URLs in place.
    ///
    /// Fail-closed: any violation rejects the whole configuration. Trailing
    /// slashes are stripped from host and upstream URLs, and `health_uri`
    /// gains a leading `/` (defaulting to `/` when absent).
    pub fn validate(&mut self) -> Result<()> {
        if self.services.is_empty() {
            return Err(ProxyError::Config(
                "No services defined in config file".into(),
            ));
        }

        let mut service_names = HashSet::new();
        // (domain, path prefix, port) must be unique across all services
        let mut route_keys = HashSet::new();

        for svc in &mut self.services {
            if svc.name.is_empty() {
                return Err(ProxyError::Config("Service with empty name".into()));
            }
            if !service_names.insert(svc.name.clone()) {
                return Err(ProxyError::Config(format!(
                    "Duplicate service name found: {}",
                    svc.name
                )));
            }

            if svc.listen_port == 0 {
                return Err(ProxyError::Config(format!(
                    "Invalid port {} in service {}",
                    svc.listen_port, svc.name
                )));
            }

            if svc.hosts.is_empty() {
                return Err(ProxyError::Config(format!(
                    "No hosts defined for service {}",
                    svc.name
                )));
            }

            let mut inbound_hosts = HashSet::new();
            for link in &mut svc.hosts {
                if let Some(stripped) = link.strip_suffix('/') {
                    *link = stripped.to_string();
                }
                if link.is_empty() {
                    return Err(ProxyError::Config(format!(
                        "Empty host URL in service {}",
                        svc.name
                    )));
                }

                let parsed = parse_host_url(link).ok_or_else(|| {
                    ProxyError::Config(format!(
                        "Service '{}': invalid host URL '{}'",
                        svc.name, link
                    ))
                })?;

                if !inbound_hosts.insert(link.clone()) {
                    return Err(ProxyError::Config(format!(
                        "Duplicate host {} found in service {}",
                        link, svc.name
                    )));
                }

                let key = (
                    parsed.authority().to_string(),
                    parsed.path().to_string(),
                    svc.listen_port,
                );
                if !route_keys.insert(key) {
                    return Err(ProxyError::Config(format!(
                        "Host {} on port {} is routed by more than one service",
                        link, svc.listen_port
                    )));
                }
            }

            if svc.upstreams.is_empty() {
                return Err(ProxyError::Config(format!(
                    "No upstreams defined for service {}",
                    svc.name
                )));
            }

            let mut upstream_hosts = HashSet::new();
            for upstream in &mut svc.upstreams {
                if let Some(stripped) = upstream.host.strip_suffix('/') {
                    upstream.host = stripped.to_string();
                }
                if upstream.host.is_empty() {
                    return Err(ProxyError::Config(format!(
                        "Empty upstream URL in service {}",
                        svc.name
                    )));
                }

                parse_host_url(&upstream.host).ok_or_else(|| {
                    ProxyError::Config(format!(
                        "Service '{}': invalid upstream URL '{}'",
                        svc.name, upstream.host
                    ))
                })?;

                if !upstream_hosts.insert(upstream.host.clone()) {
                    return Err(ProxyError::Config(format!(
                        "Duplicate upstream host {} found in service {}",
                        upstream.host, svc.name
                    )));
                }

                if upstream.health_uri.is_empty() {
                    upstream.health_uri = "/".to_string();
                } else if !upstream.health_uri.starts_with('/') {
                    upstream.health_uri = format!("/{}", upstream.health_uri);
                }
            }
        }

        Ok(())
    }
}

/// Parse a URL requiring a scheme and an authority.
fn parse_host_url(raw: &str) -> Option<Url> {
    let parsed = Url::parse(raw).ok()?;
    if parsed.scheme().is_empty() || parsed.host_str().is_none() {
        return None;
    }
    Some(parsed)
}
