// ────────────────────────────────
// src/proxy/router.rs
// Per-request entry point: pick the next alive backend and forward to it.
// ────────────────────────────────

use super::forward::ClientAddr;
use super::pool::ServerPool;
use crate::metrics::{MetricsCollector, Timer};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub struct Router {
    pool: Arc<ServerPool>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Router {
    pub fn new(pool: Arc<ServerPool>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { pool, metrics }
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Never fails: routing and forwarding errors become error responses. No retries.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let timer = Timer::new();
        let method = req.method().clone();
        let client_addr = req.extensions().get::<ClientAddr>().map(|addr| addr.0);
        let span = info_span!(
            "request",
            id = %Uuid::new_v4(),
            method = %method,
            path = %req.uri().path(),
        );

        async move {
            let (response, backend_id) = match self.pool.get_next().await {
                Some(backend) => {
                    debug!(backend = %backend.id, "Forwarding request");
                    match backend.proxy().forward(req, client_addr).await {
                        Ok(response) => (response, backend.id.clone()),
                        Err(e) => {
                            warn!(backend = %backend.id, error = %e, "Forwarding failed");
                            (Response::from(e), backend.id.clone())
                        }
                    }
                }
                None => {
                    warn!("No alive backend available");
                    (Response::from(ProxyError::NoBackendAvailable), "none".to_string())
                }
            };

            debug!(status = %response.status(), backend = %backend_id, "Request complete");
            if let Some(metrics) = &self.metrics {
                metrics.record_request(
                    method.as_str(),
                    response.status().as_u16(),
                    &backend_id,
                    timer.elapsed(),
                );
            }

            response
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No alive backend available")]
    NoBackendAvailable,

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Invalid upstream URI: {0}")]
    InvalidUri(String),

    #[error("Request timeout")]
    Timeout,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BackendError(_) | ProxyError::InvalidUri(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let message = match err {
            ProxyError::NoBackendAvailable => "Service not available\n",
            ProxyError::BackendError(_) | ProxyError::InvalidUri(_) => "Bad gateway\n",
            ProxyError::Timeout => "Gateway timeout\n",
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = err.status();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_gateway_statuses() {
        let r = Response::from(ProxyError::NoBackendAvailable);
        assert_eq!(r.status(), StatusCode::SERVICE_UNAVAILABLE);

        let r = Response::from(ProxyError::BackendError("connection refused".into()));
        assert_eq!(r.status(), StatusCode::BAD_GATEWAY);

        let r = Response::from(ProxyError::Timeout);
        assert_eq!(r.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn empty_pool_answers_service_unavailable() {
        let router = Router::new(Arc::new(ServerPool::new()), None);
        let response = router
            .handle(Request::get("/").body(Body::empty()).unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"Service not available\n");
    }
}
