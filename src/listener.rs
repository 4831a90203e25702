//! Listeners — per-port acceptor lifecycles
//!
//! Each configured port gets one accept loop serving cleartext HTTP/1.1 and
//! h2c. Reloads converge the running set to the configured set: unchanged
//! ports are never interrupted, removed ports drain gracefully with a 5s
//! deadline, new ports start fresh.

use crate::handler;
use crate::state::RuntimeState;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Grace period for draining a listener that left the configuration
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running per-port listener
pub struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop accepting; in-flight requests drain in the background.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for the accept loop to finish draining (bounded by the grace
    /// period plus a margin).
    pub async fn join(self) {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE + Duration::from_secs(1), self.task).await;
    }
}

/// Reconcile running listeners with `new_ports`.
///
/// The listener lock is held only for the map surgery; draining happens on
/// the listener's own task, off the reload path.
pub async fn converge(state: &Arc<RuntimeState>, new_ports: &HashSet<u16>) {
    let mut listeners = state.listeners().lock().await;

    let stale: Vec<u16> = listeners
        .keys()
        .filter(|port| !new_ports.contains(port))
        .copied()
        .collect();
    for port in stale {
        if let Some(handle) = listeners.remove(&port) {
            tracing::info!(port, "Stopping listener");
            handle.begin_shutdown();
        }
    }

    for &port in new_ports {
        if !listeners.contains_key(&port) {
            listeners.insert(port, spawn_listener(port, state.clone()));
        }
    }
}

/// Gracefully stop every listener (process shutdown).
pub async fn shutdown_all(state: &Arc<RuntimeState>) {
    let handles: Vec<ListenerHandle> = {
        let mut listeners = state.listeners().lock().await;
        listeners.drain().map(|(_, handle)| handle).collect()
    };
    for handle in &handles {
        handle.begin_shutdown();
    }
    for handle in handles {
        handle.join().await;
    }
}

fn spawn_listener(port: u16, state: Arc<RuntimeState>) -> ListenerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_listener(port, state, shutdown_rx));
    ListenerHandle {
        shutdown: shutdown_tx,
        task,
    }
}

async fn run_listener(port: u16, state: Arc<RuntimeState>, mut shutdown: watch::Receiver<bool>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(port, error = %e, "Failed to bind listener");
            return;
        }
    };
    tracing::info!(port, "Listening");

    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(port, error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let state = state.clone();
                let service = service_fn(move |req| {
                    let state = state.clone();
                    async move {
                        Ok::<_, std::convert::Infallible>(
                            handler::handle(state, port, remote_addr, req).await,
                        )
                    }
                });

                let builder = auto::Builder::new(TokioExecutor::new());
                let conn = graceful.watch(builder.serve_connection(io, service).into_owned());
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        tracing::debug!(port, error = %e, "Connection ended");
                    }
                });
            }
            _ = shutdown.changed() => break,
        }
    }

    // Stop accepting before draining what is in flight
    drop(listener);
    tokio::select! {
        _ = graceful.shutdown() => tracing::info!(port, "Listener drained"),
        _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
            tracing::warn!(port, "Listener drain deadline reached, dropping remaining connections");
        }
    }
}
