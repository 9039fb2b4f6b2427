// src/health/checker.rs
use super::probe::Probe;
use crate::metrics::MetricsCollector;
use crate::proxy::ServerPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub alive: usize,
    pub total: usize,
}

/// Periodically re-probes the whole pool. Runs are spawned, so a slow run
/// may overlap the next one; each backend update is independent.
pub struct HealthChecker {
    pool: Arc<ServerPool>,
    probe: Arc<dyn Probe>,
    interval: Duration,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HealthChecker {
    pub fn new(
        pool: Arc<ServerPool>,
        probe: Arc<dyn Probe>,
        interval: Duration,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            pool,
            probe,
            interval,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!("Starting health checker with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let checker = self.clone();
                    tokio::spawn(async move {
                        checker.check_once().await;
                    });
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn check_once(&self) -> HealthReport {
        let report = self.pool.health_check(self.probe.as_ref()).await;

        if let Some(metrics) = &self.metrics {
            for backend in self.pool.backends() {
                metrics.update_backend_health(&backend.id, backend.is_alive().await);
            }
            metrics.update_backend_counts(report.alive, report.total);
        }

        debug!(
            "Health check complete: {} alive, {} down",
            report.alive,
            report.total - report.alive
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ProbeError;
    use crate::proxy::{upstream_client, Backend};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use url::Url;

    struct SwitchProbe {
        reachable: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Probe for SwitchProbe {
        async fn probe(&self, _target: &Url) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProbeError::Timeout)
            }
        }
    }

    fn pool_of(n: u16) -> Arc<ServerPool> {
        let client = upstream_client();
        let mut pool = ServerPool::new();
        for i in 0..n {
            let url = Url::parse(&format!("http://127.0.0.1:{}", 9200 + i)).unwrap();
            pool.add_backend(Backend::new(url, client.clone()));
        }
        Arc::new(pool)
    }

    #[tokio::test]
    async fn check_once_is_idempotent() {
        let pool = pool_of(2);
        let probe = Arc::new(SwitchProbe {
            reachable: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let checker = HealthChecker::new(pool.clone(), probe.clone(), Duration::from_secs(5), None);

        let first = checker.check_once().await;
        let second = checker.check_once().await;
        assert_eq!(first, second);
        assert_eq!(first, HealthReport { alive: 0, total: 2 });
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn periodic_runs_track_reachability_until_shutdown() {
        let pool = pool_of(3);
        let probe = Arc::new(SwitchProbe {
            reachable: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let checker = Arc::new(HealthChecker::new(
            pool.clone(),
            probe.clone(),
            Duration::from_millis(20),
            None,
        ));

        let handle = tokio::spawn(checker.clone().start());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.alive_count().await, 3);

        probe.reachable.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.alive_count().await, 0);

        checker.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("checker loop should exit")
            .unwrap();
    }
}
