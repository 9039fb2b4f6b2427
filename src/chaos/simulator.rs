// src/chaos/simulator.rs
use crate::metrics::MetricsCollector;
use crate::proxy::ServerPool;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, warn};

/// Resilience harness: every interval, takes one random alive backend down
/// and brings it back after `restart_delay`.
pub struct FailureSimulator {
    pool: Arc<ServerPool>,
    interval: Duration,
    restart_delay: Duration,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl FailureSimulator {
    pub fn new(
        pool: Arc<ServerPool>,
        interval: Duration,
        restart_delay: Duration,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            pool,
            interval,
            restart_delay,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub async fn start(self: Arc<Self>) {
        // First strike only after a full interval.
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            "Starting failure simulator: every {:?}, restart after {:?}",
            self.interval, self.restart_delay
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.strike().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Failure simulator shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One simulation step. Returns the index of the backend taken down, if any.
    /// A backend that is already down is left alone.
    pub async fn strike(&self) -> Option<usize> {
        if self.pool.is_empty() {
            return None;
        }

        let index = rand::thread_rng().gen_range(0..self.pool.len());
        let backend = self.pool.get(index)?.clone();

        if !backend.is_alive().await {
            debug!(backend = %backend.id, "Backend already down, skipping simulated outage");
            return None;
        }

        warn!(backend = %backend.id, "Simulating backend outage");
        backend.stop().await;

        if let Some(metrics) = &self.metrics {
            metrics.record_simulated_outage(&backend.id);
        }

        let delay = self.restart_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            match backend.start().await {
                Ok(()) => info!(backend = %backend.id, "Backend restarted after simulated outage"),
                Err(e) => error!(backend = %backend.id, error = %e, "Backend restart failed"),
            }
        });

        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{upstream_client, Backend, BackendError, Upstream};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    #[derive(Default)]
    struct CountingUpstream {
        starts: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl Upstream for CountingUpstream {
        async fn start(&self) -> Result<(), BackendError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self, _grace: Duration) -> Result<(), BackendError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn single_backend_pool(upstream: Arc<CountingUpstream>) -> Arc<ServerPool> {
        let mut pool = ServerPool::new();
        let url = Url::parse("http://127.0.0.1:9300").unwrap();
        pool.add_backend(Backend::new(url, upstream_client()).with_upstream(upstream));
        Arc::new(pool)
    }

    #[tokio::test]
    async fn stopped_backend_returns_after_delay() {
        let upstream = Arc::new(CountingUpstream::default());
        let pool = single_backend_pool(upstream.clone());
        pool.backends()[0].start().await.unwrap();

        let sim = FailureSimulator::new(
            pool.clone(),
            Duration::from_secs(60),
            Duration::from_millis(50),
            None,
        );

        assert_eq!(sim.strike().await, Some(0));
        assert!(!pool.backends()[0].is_alive().await);
        assert_eq!(upstream.shutdowns.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(pool.backends()[0].is_alive().await);
        assert_eq!(upstream.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn never_stops_a_down_backend() {
        let upstream = Arc::new(CountingUpstream::default());
        let pool = single_backend_pool(upstream.clone());
        pool.backends()[0].set_alive(false).await;

        let sim = FailureSimulator::new(
            pool.clone(),
            Duration::from_secs(60),
            Duration::from_millis(10),
            None,
        );

        for _ in 0..5 {
            assert_eq!(sim.strike().await, None);
        }
        assert_eq!(upstream.shutdowns.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pool.backends()[0].is_alive().await);
    }

    #[tokio::test]
    async fn empty_pool_is_a_no_op() {
        let sim = FailureSimulator::new(
            Arc::new(ServerPool::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
            None,
        );
        assert_eq!(sim.strike().await, None);
    }

    #[tokio::test]
    async fn loop_exits_on_shutdown() {
        let upstream = Arc::new(CountingUpstream::default());
        let pool = single_backend_pool(upstream);
        let sim = Arc::new(FailureSimulator::new(
            pool,
            Duration::from_secs(60),
            Duration::from_secs(60),
            None,
        ));

        let handle = tokio::spawn(sim.clone().start());
        sim.shutdown();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("simulator loop should exit")
            .unwrap();
    }
}
