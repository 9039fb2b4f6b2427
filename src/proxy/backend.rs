// src/proxy/backend.rs
use super::forward::{ReverseProxy, UpstreamClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Alive,
    Down,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to bind backend listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("graceful shutdown exceeded {0:?}, open connections aborted")]
    ShutdownTimeout(Duration),
}

/// The listener behind a backend, when the balancer owns it.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Resolves once the listener is accepting connections.
    async fn start(&self) -> Result<(), BackendError>;

    /// Stops accepting and waits up to `grace` for in-flight requests.
    async fn shutdown(&self, grace: Duration) -> Result<(), BackendError>;
}

pub struct Backend {
    pub id: String,
    pub url: Url,
    proxy: ReverseProxy,
    upstream: Option<Arc<dyn Upstream>>,
    drain_timeout: Duration,

    status: RwLock<HealthStatus>,
    last_health_check: RwLock<Option<DateTime<Utc>>>,
}

impl Backend {
    pub fn new(url: Url, client: UpstreamClient) -> Self {
        let id = format!(
            "{}:{}",
            url.host_str().unwrap_or("unknown"),
            url.port_or_known_default().unwrap_or(80)
        );
        let proxy = ReverseProxy::new(url.clone(), client);

        Self {
            id,
            url,
            proxy,
            upstream: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            status: RwLock::new(HealthStatus::Unknown),
            last_health_check: RwLock::new(None),
        }
    }

    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.proxy = self.proxy.with_timeout(timeout);
        self
    }

    pub fn is_managed(&self) -> bool {
        self.upstream.is_some()
    }

    pub fn proxy(&self) -> &ReverseProxy {
        &self.proxy
    }

    pub async fn set_alive(&self, alive: bool) {
        let mut status = self.status.write().await;
        *status = if alive {
            HealthStatus::Alive
        } else {
            HealthStatus::Down
        };
    }

    pub async fn is_alive(&self) -> bool {
        *self.status.read().await == HealthStatus::Alive
    }

    pub async fn status(&self) -> HealthStatus {
        *self.status.read().await
    }

    /// Apply a probe outcome and stamp the check time.
    pub async fn record_probe(&self, alive: bool) {
        self.set_alive(alive).await;
        *self.last_health_check.write().await = Some(Utc::now());
    }

    pub async fn last_health_check(&self) -> Option<DateTime<Utc>> {
        *self.last_health_check.read().await
    }

    /// Bring the listener up, then mark the backend alive.
    pub async fn start(&self) -> Result<(), BackendError> {
        if let Some(upstream) = &self.upstream {
            upstream.start().await?;
        }
        self.set_alive(true).await;
        info!(backend = %self.id, "Backend started");
        Ok(())
    }

    /// Best-effort drain. The backend ends up Down even if the drain times out.
    pub async fn stop(&self) {
        if let Some(upstream) = &self.upstream {
            if let Err(e) = upstream.shutdown(self.drain_timeout).await {
                warn!(backend = %self.id, error = %e, "Forced backend shutdown");
            }
        }
        self.set_alive(false).await;
        info!(backend = %self.id, "Backend has been stopped");
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("managed", &self.is_managed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::forward::upstream_client;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingUpstream {
        starts: AtomicUsize,
        shutdowns: AtomicUsize,
        hang_on_shutdown: bool,
    }

    #[async_trait]
    impl Upstream for RecordingUpstream {
        async fn start(&self) -> Result<(), BackendError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self, grace: Duration) -> Result<(), BackendError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            if self.hang_on_shutdown {
                Err(BackendError::ShutdownTimeout(grace))
            } else {
                Ok(())
            }
        }
    }

    fn backend(url: &str) -> Backend {
        Backend::new(Url::parse(url).unwrap(), upstream_client())
    }

    #[tokio::test]
    async fn new_backend_is_unknown_and_not_alive() {
        let b = backend("http://localhost:8081");
        assert_eq!(b.status().await, HealthStatus::Unknown);
        assert!(!b.is_alive().await);
        assert!(b.last_health_check().await.is_none());
        assert_eq!(b.id, "localhost:8081");
    }

    #[tokio::test]
    async fn id_uses_known_default_port() {
        assert_eq!(backend("https://api.example.com").id, "api.example.com:443");
    }

    #[tokio::test]
    async fn set_alive_is_read_back() {
        let b = backend("http://localhost:8081");
        b.set_alive(false).await;
        assert!(!b.is_alive().await);
        assert_eq!(b.status().await, HealthStatus::Down);
        b.set_alive(true).await;
        assert!(b.is_alive().await);
    }

    #[tokio::test]
    async fn record_probe_stamps_time() {
        let b = backend("http://localhost:8081");
        b.record_probe(true).await;
        assert!(b.is_alive().await);
        assert!(b.last_health_check().await.is_some());
    }

    #[tokio::test]
    async fn start_and_stop_drive_the_upstream() {
        let upstream = Arc::new(RecordingUpstream::default());
        let b = backend("http://localhost:8081").with_upstream(upstream.clone());
        assert!(b.is_managed());

        b.start().await.unwrap();
        assert!(b.is_alive().await);
        assert_eq!(upstream.starts.load(Ordering::SeqCst), 1);

        b.stop().await;
        assert!(!b.is_alive().await);
        assert_eq!(upstream.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forced_shutdown_still_marks_down() {
        let upstream = Arc::new(RecordingUpstream {
            hang_on_shutdown: true,
            ..Default::default()
        });
        let b = backend("http://localhost:8081")
            .with_upstream(upstream)
            .with_drain_timeout(Duration::from_millis(10));
        b.start().await.unwrap();

        b.stop().await;
        assert_eq!(b.status().await, HealthStatus::Down);
    }

    #[tokio::test]
    async fn unmanaged_backend_toggles_liveness_only() {
        let b = backend("http://localhost:8081");
        assert!(!b.is_managed());
        b.start().await.unwrap();
        assert!(b.is_alive().await);
        b.stop().await;
        assert!(!b.is_alive().await);
    }
}
