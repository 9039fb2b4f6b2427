//
// src/proxy/mod.rs
//
mod backend;
mod forward;
mod pool;
mod router;

pub use backend::{Backend, BackendError, HealthStatus, Upstream, DEFAULT_DRAIN_TIMEOUT};
pub(crate) use forward::join_paths;
pub use forward::{upstream_client, ClientAddr, ReverseProxy, UpstreamClient, DEFAULT_FORWARD_TIMEOUT};
pub use pool::ServerPool;
pub use router::{ProxyError, Router};
