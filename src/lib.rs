//! # switchyard
//!
//! A reconfigurable layer-7 reverse proxy and load balancer.
//!
//! ## Architecture
//!
//! ```text
//! Listener (per port) → Handler (host+prefix route, cache) → Balancer → Backend (ReverseProxy) → Upstream
//! ```
//!
//! ## Core Features
//!
//! - **Routing**: `(Host, port, longest path prefix)` → service, from an
//!   atomically swapped immutable snapshot
//! - **Load Balancing**: round-robin and least-connections over alive backends
//! - **Health Checks**: periodic TCP + HTTP probes flipping per-backend liveness
//! - **Response Cache**: LRU with per-entry TTL, honoring upstream `Cache-Control`
//! - **Hot Reload**: SIGHUP re-applies the YAML config without dropping
//!   in-flight requests or resetting surviving backends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchyard::{config::Config, reload, state::RuntimeState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let state = Arc::new(RuntimeState::new());
//!     let config = Config::load("./config.yaml").await?;
//!     reload::apply(&state, &config, true).await?;
//!     tokio::signal::ctrl_c().await?;
//!     reload::shutdown(&state).await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod balancer;
pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod listener;
pub mod proxy;
pub mod reload;
pub mod state;

// Re-export main types
pub use error::{ProxyError, Result};
