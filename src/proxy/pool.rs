//
// src/proxy/pool.rs
//

use super::backend::Backend;
use super::forward::UpstreamClient;
use crate::config::Config;
use crate::health::{HealthReport, Probe};
use crate::server::DemoServer;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Ordered, append-only set of backends plus the round-robin cursor.
///
/// Membership is fixed once the pool is shared, so iteration needs no lock;
/// the only contended state is the cursor and each backend's liveness flag.
#[derive(Debug, Default)]
pub struct ServerPool {
    backends: Vec<Arc<Backend>>,
    current: AtomicU64,
}

impl ServerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the pool described by `config`. Managed backends get an
    /// in-process demo listener on their URL's port, numbered by position.
    pub fn from_config(config: &Config, client: UpstreamClient) -> Self {
        let mut pool = Self::new();

        for (index, backend_config) in config.backends.iter().enumerate() {
            let url = backend_config.url.clone();
            let mut backend = Backend::new(url.clone(), client.clone())
                .with_forward_timeout(config.forward_timeout())
                .with_drain_timeout(config.drain_timeout());

            if backend_config.managed {
                let port = url.port_or_known_default().unwrap_or(80);
                let addr = SocketAddr::from(([0, 0, 0, 0], port));
                backend = backend.with_upstream(Arc::new(DemoServer::new(index, addr)));
            }

            pool.add_backend(backend);
        }

        pool
    }

    /// Initialization only: `&mut self` keeps this out of reach once the pool is shared.
    pub fn add_backend(&mut self, backend: Backend) -> Arc<Backend> {
        let backend = Arc::new(backend);
        info!(backend = %backend.id, managed = backend.is_managed(), "Added backend");
        self.backends.push(backend.clone());
        backend
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Backend>> {
        self.backends.get(index)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Current raw cursor value (number of increments so far, modulo wraparound).
    pub fn cursor(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Atomically advances the cursor and returns the post-increment value.
    /// No two callers observe the same value until the counter wraps.
    pub fn advance_cursor(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Round-robin with skip: at most one full rotation of probes.
    ///
    /// The cursor is incremented before indexing, so with a fresh pool the
    /// first pick is index 1, not 0.
    pub async fn get_next(&self) -> Option<Arc<Backend>> {
        let len = self.backends.len() as u64;

        for _ in 0..len {
            let index = (self.advance_cursor() % len) as usize;
            let backend = &self.backends[index];
            if backend.is_alive().await {
                return Some(backend.clone());
            }
        }

        None
    }

    pub async fn alive_count(&self) -> usize {
        let mut alive = 0;
        for backend in &self.backends {
            if backend.is_alive().await {
                alive += 1;
            }
        }
        alive
    }

    /// Probe every backend concurrently and overwrite its liveness with the result.
    pub async fn health_check(&self, probe: &dyn Probe) -> HealthReport {
        let checks = self.backends.iter().map(|backend| async move {
            let outcome = probe.probe(&backend.url).await;
            let alive = outcome.is_ok();
            backend.record_probe(alive).await;

            match outcome {
                Ok(()) => info!(backend = %backend.id, "{} [up]", backend.url),
                Err(e) => warn!(backend = %backend.id, error = %e, "{} [down]", backend.url),
            }
            alive
        });

        let results = futures::future::join_all(checks).await;

        HealthReport {
            alive: results.iter().filter(|alive| **alive).count(),
            total: results.len(),
        }
    }
}
