// ────────────────────────────────
// src/server/listener.rs
// TCP bind for the inbound side of the balancer.
// ────────────────────────────────
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind load balancer listener on {addr}"))
}
