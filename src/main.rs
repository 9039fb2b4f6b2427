// src/main.rs
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use rr_load_balancer::{
    chaos::FailureSimulator,
    config::{self, Config},
    health::{HealthChecker, HttpProbe},
    metrics::{start_metrics_server, MetricsRegistry},
    proxy::{upstream_client, Router, ServerPool},
    server::{RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rr_load_balancer=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            config::load_config(&path).await?
        }
        None => {
            info!("No configuration file given, using the built-in demo topology");
            let config = Config::default();
            config.validate()?;
            config
        }
    };

    // Initialize metrics
    let metrics_registry = Arc::new(MetricsRegistry::new()?);
    let metrics = config.metrics.enabled.then(|| metrics_registry.collector());

    // Build the pool before anything can read it
    let pool = Arc::new(ServerPool::from_config(&config, upstream_client()));

    for backend in pool.backends().iter().filter(|b| b.is_managed()) {
        if let Err(e) = backend.start().await {
            error!(backend = %backend.id, error = %e, "Failed to start backend");
        }
    }

    // Start health checker
    let probe = Arc::new(HttpProbe::new(&config.health_check)?);
    let health_checker = Arc::new(HealthChecker::new(
        pool.clone(),
        probe,
        config.health_check.interval(),
        metrics.clone(),
    ));
    tokio::spawn(health_checker.clone().start());

    // Start failure simulation if enabled
    let simulator = config.failure_simulation.enabled.then(|| {
        Arc::new(FailureSimulator::new(
            pool.clone(),
            config.failure_simulation.interval(),
            config.failure_simulation.restart_delay(),
            metrics.clone(),
        ))
    });
    if let Some(simulator) = &simulator {
        tokio::spawn(simulator.clone().start());
    }

    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone())?;
    }

    let router = Arc::new(Router::new(pool.clone(), metrics));
    let handler = RequestHandler::new(router);

    info!("Starting load balancer on {}", config.listen_addr);

    ServerBuilder::new(config.listen_addr)
        .with_handler(handler)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    health_checker.shutdown();
    if let Some(simulator) = &simulator {
        simulator.shutdown();
    }

    let stops = pool
        .backends()
        .iter()
        .filter(|b| b.is_managed())
        .map(|b| b.stop());
    futures::future::join_all(stops).await;

    info!("Load balancer stopped");
    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
