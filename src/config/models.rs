// src/config/models.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub failure_simulation: FailureSimulationConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default = "default_forward_timeout_secs")]
    pub forward_timeout_secs: u64,

    /// Grace period given to a managed backend's in-flight requests on stop.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Url,

    /// Run an in-process demo listener on the URL's port.
    #[serde(default)]
    pub managed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_health_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSimulationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_simulation_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_forward_timeout_secs() -> u64 {
    30
}

fn default_drain_timeout_secs() -> u64 {
    5
}

fn default_health_interval_secs() -> u64 {
    5
}

fn default_health_timeout_secs() -> u64 {
    2
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_simulation_interval_secs() -> u64 {
    60
}

fn default_restart_delay_secs() -> u64 {
    60
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
            path: default_health_path(),
        }
    }
}

impl Default for FailureSimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_simulation_interval_secs(),
            restart_delay_secs: default_restart_delay_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

/// The demo topology: four in-process backends on 8081-8084 with chaos enabled.
impl Default for Config {
    fn default() -> Self {
        let backends = (8081..=8084)
            .filter_map(|port| Url::parse(&format!("http://localhost:{port}")).ok())
            .map(|url| BackendConfig { url, managed: true })
            .collect();

        Self {
            listen_addr: default_listen_addr(),
            backends,
            health_check: HealthCheckConfig::default(),
            failure_simulation: FailureSimulationConfig {
                enabled: true,
                ..FailureSimulationConfig::default()
            },
            metrics: MetricsConfig::default(),
            forward_timeout_secs: default_forward_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("at least one backend must be configured");
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            let url = &backend.url;
            if !matches!(url.scheme(), "http" | "https") {
                bail!("backend {url} must use http or https");
            }
            if url.host_str().is_none() {
                bail!("backend {url} has no host");
            }
            if !seen.insert(url.as_str()) {
                bail!("backend {url} is configured more than once");
            }
        }

        if self.forward_timeout_secs == 0 {
            bail!("forward_timeout_secs must be greater than zero");
        }
        if self.drain_timeout_secs == 0 {
            bail!("drain_timeout_secs must be greater than zero");
        }

        self.health_check.validate()?;
        self.failure_simulation.validate()?;

        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            bail!("metrics.path must start with '/'");
        }

        Ok(())
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl HealthCheckConfig {
    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("health_check.interval_secs must be greater than zero");
        }
        if self.timeout_secs == 0 {
            bail!("health_check.timeout_secs must be greater than zero");
        }
        if !self.path.starts_with('/') {
            bail!("health_check.path must start with '/'");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl FailureSimulationConfig {
    fn validate(&self) -> Result<()> {
        if self.enabled && (self.interval_secs == 0 || self.restart_delay_secs == 0) {
            bail!("failure_simulation intervals must be greater than zero");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}
