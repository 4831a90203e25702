//! Health checker — periodic TCP + HTTP probes over the backend registry
//!
//! One loop ticks every 10 seconds (the first sweep runs immediately) and
//! spawns an independent probe task per backend, so one stuck probe never
//! delays the rest. Liveness transitions are edge-triggered: a flip is
//! logged only when the flag actually changes.

use crate::backend::Backend;
use crate::state::RuntimeState;
use http::StatusCode;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const PROBE_INTERVAL: Duration = Duration::from_secs(10);
const TCP_TIMEOUT: Duration = Duration::from_secs(1);
const HTTP_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared probe client with the 3s total HTTP timeout
static HEALTH_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn health_client() -> &'static reqwest::Client {
    HEALTH_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default()
    })
}

/// Spawn the probe loop for the lifetime of the process.
pub fn spawn(state: Arc<RuntimeState>) -> JoinHandle<()> {
    tokio::spawn(run(state))
}

async fn run(state: Arc<RuntimeState>) {
    let mut ticker = tokio::time::interval(PROBE_INTERVAL);
    loop {
        ticker.tick().await;
        let backends: Vec<Arc<Backend>> = state
            .registry()
            .read()
            .unwrap()
            .values()
            .cloned()
            .collect();
        for backend in backends {
            tokio::spawn(probe(backend));
        }
    }
}

/// One probe: a fast TCP dial to the upstream's host:port, then an HTTP GET
/// of the health URI that must answer exactly 200.
async fn probe(backend: Arc<Backend>) {
    let host = backend.url().host_str().unwrap_or_default().to_string();
    let port = backend.url().port_or_known_default().unwrap_or(80);

    let dialed = tokio::time::timeout(TCP_TIMEOUT, TcpStream::connect((host.as_str(), port))).await;
    match dialed {
        Ok(Ok(stream)) => drop(stream),
        _ => {
            if backend.is_alive() {
                backend.set_health(false);
                tracing::warn!(address = backend.address(), "Backend went offline");
            }
            return;
        }
    }

    let health_url = format!("http://{}{}", backend.address(), backend.health_uri());
    match health_client().get(&health_url).send().await {
        Ok(response) if response.status() == StatusCode::OK => {
            if !backend.is_alive() {
                backend.set_health(true);
                tracing::info!(address = backend.address(), "Backend is back online");
            }
        }
        _ => {
            if backend.is_alive() {
                backend.set_health(false);
                tracing::warn!(address = backend.address(), "Backend failing healthchecks");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use url::Url;

    fn backend_for(addr: SocketAddr, health_uri: &str) -> Arc<Backend> {
        Arc::new(Backend::new(
            Url::parse(&format!("http://{}", addr)).unwrap(),
            health_uri.to_string(),
        ))
    }

    /// A one-shot HTTP server answering every request with `status`
    async fn spawn_health_endpoint(status: u16) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let resp = format!(
                        "HTTP/1.1 {} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status
                    );
                    let _ = stream.write_all(resp.as_bytes()).await;
                });
            }
        });
        addr
    }

    /// An address with nothing listening on it
    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_probe_marks_dead_on_tcp_refusal() {
        let backend = backend_for(dead_addr().await, "/");
        assert!(backend.is_alive());
        probe(backend.clone()).await;
        assert!(!backend.is_alive());
    }

    #[tokio::test]
    async fn test_probe_marks_dead_on_non_200() {
        let addr = spawn_health_endpoint(500).await;
        let backend = backend_for(addr, "/health");
        probe(backend.clone()).await;
        assert!(!backend.is_alive());
    }

    #[tokio::test]
    async fn test_probe_revives_on_200() {
        let addr = spawn_health_endpoint(200).await;
        let backend = backend_for(addr, "/health");
        backend.set_health(false);
        probe(backend.clone()).await;
        assert!(backend.is_alive());
    }

    #[tokio::test]
    async fn test_probe_keeps_alive_on_200() {
        let addr = spawn_health_endpoint(200).await;
        let backend = backend_for(addr, "/");
        probe(backend.clone()).await;
        assert!(backend.is_alive());
    }
}
