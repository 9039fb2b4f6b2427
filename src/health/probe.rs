// src/health/probe.rs
use crate::config::HealthCheckConfig;
use crate::proxy::join_paths;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("probe timed out")]
    Timeout,

    #[error("HTTP {0}")]
    Status(u16),
}

/// Liveness probe for a single backend address.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &Url) -> Result<(), ProbeError>;
}

/// `HEAD <target><path>`; any 2xx counts as alive. The path is appended to
/// the target's own path, the same way requests are forwarded.
pub struct HttpProbe {
    client: Client,
    path: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(config: &HealthCheckConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            path: config.path.clone(),
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, target: &Url) -> Result<(), ProbeError> {
        let mut url = target.clone();
        url.set_path(&join_paths(target.path(), &self.path));

        match timeout(self.timeout, self.client.head(url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(ProbeError::Status(response.status().as_u16())),
            Ok(Err(e)) if e.is_timeout() => Err(ProbeError::Timeout),
            Ok(Err(e)) => Err(ProbeError::Unreachable(e.to_string())),
            Err(_) => Err(ProbeError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_at(path: &str) -> HttpProbe {
        HttpProbe::new(&HealthCheckConfig {
            interval_secs: 1,
            timeout_secs: 1,
            path: path.into(),
        })
        .unwrap()
    }

    fn probe() -> HttpProbe {
        probe_at("/health")
    }

    #[tokio::test]
    async fn success_status_is_alive() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", "/health")
            .with_status(204)
            .create_async()
            .await;

        let target = Url::parse(&server.url()).unwrap();
        assert_eq!(probe().probe(&target).await, Ok(()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_down() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/health")
            .with_status(503)
            .create_async()
            .await;

        let target = Url::parse(&server.url()).unwrap();
        assert_eq!(probe().probe(&target).await, Err(ProbeError::Status(503)));
    }

    #[tokio::test]
    async fn keeps_the_backend_base_path() {
        let mut server = mockito::Server::new_async().await;
        let base = server
            .mock("HEAD", "/api/")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let root = server
            .mock("HEAD", "/")
            .with_status(404)
            .expect(0)
            .create_async()
            .await;

        let target = Url::parse(&format!("{}/api/", server.url())).unwrap();
        assert_eq!(probe_at("/").probe(&target).await, Ok(()));
        base.assert_async().await;
        root.assert_async().await;
    }

    #[tokio::test]
    async fn health_path_is_appended_under_base_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", "/api/health")
            .with_status(200)
            .create_async()
            .await;

        let target = Url::parse(&format!("{}/api", server.url())).unwrap();
        assert_eq!(probe().probe(&target).await, Ok(()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn refused_connection_is_down() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let target = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        assert!(matches!(
            probe().probe(&target).await,
            Err(ProbeError::Unreachable(_))
        ));
    }
}
