// ────────────────────────────────
// src/server/demo.rs
// In-process backend listener for managed backends.
// ────────────────────────────────
use crate::proxy::{BackendError, Upstream};
use async_trait::async_trait;
use hyper::{server::conn::Http, service::service_fn, Body, Request, Response};
use std::{convert::Infallible, net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

struct Running {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Answers every request with `Hello from backend server <id>`.
pub struct DemoServer {
    id: usize,
    addr: SocketAddr,
    running: Mutex<Option<Running>>,
}

impl DemoServer {
    pub fn new(id: usize, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            running: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

async fn hello(id: usize, _req: Request<Body>) -> Result<Response<Body>, Infallible> {
    Ok(Response::new(Body::from(format!(
        "Hello from backend server {id}\n"
    ))))
}

/// Accept loop. Connections live in a `JoinSet` owned by this task, so
/// aborting the task drops the set and aborts every open connection.
async fn serve(id: usize, listener: TcpListener, mut shutdown_rx: watch::Receiver<bool>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(backend = id, error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let mut conn_shutdown = shutdown_rx.clone();
                connections.spawn(async move {
                    let conn = Http::new()
                        .serve_connection(stream, service_fn(move |req| hello(id, req)));
                    tokio::pin!(conn);

                    let result = tokio::select! {
                        result = conn.as_mut() => result,
                        _ = conn_shutdown.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    };
                    if let Err(err) = result {
                        debug!(backend = id, %peer, %err, "connection error");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

#[async_trait]
impl Upstream for DemoServer {
    async fn start(&self) -> Result<(), BackendError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        // Bind before returning so the socket is accepting once we report success.
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| BackendError::Bind {
                addr: self.addr,
                source,
            })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(serve(self.id, listener, shutdown_rx));

        info!("Starting backend server {} on {}", self.id, self.addr);
        *running = Some(Running { shutdown_tx, task });
        Ok(())
    }

    async fn shutdown(&self, grace: Duration) -> Result<(), BackendError> {
        let Some(Running { shutdown_tx, mut task }) = self.running.lock().await.take() else {
            return Ok(());
        };

        let _ = shutdown_tx.send(true);

        match timeout(grace, &mut task).await {
            Ok(_) => Ok(()),
            Err(_) => {
                task.abort();
                let _ = task.await;
                Err(BackendError::ShutdownTimeout(grace))
            }
        }
    }
}
