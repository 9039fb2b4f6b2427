// ────────────────────────────────
// src/proxy/forward.rs
// Single-host reverse proxy: the forwarding handle each Backend owns.
// ────────────────────────────────

use super::router::ProxyError;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use hyper::{Body, Client, Request, Response, Uri, Version};
use hyper_tls::HttpsConnector;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::time::timeout;
use url::{Position, Url};

pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Shared pooled client; clones share the connection pool.
pub fn upstream_client() -> UpstreamClient {
    Client::builder().build::<_, Body>(HttpsConnector::new())
}

/// Peer address of the inbound connection, stored in request extensions.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub SocketAddr);

#[derive(Clone)]
pub struct ReverseProxy {
    target: Url,
    client: UpstreamClient,
    timeout: Duration,
}

impl ReverseProxy {
    pub fn new(target: Url, client: UpstreamClient) -> Self {
        Self {
            target,
            client,
            timeout: DEFAULT_FORWARD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub async fn forward(
        &self,
        mut req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ProxyError> {
        *req.uri_mut() = self.target_uri(req.uri())?;
        *req.version_mut() = Version::HTTP_11;

        strip_hop_by_hop(req.headers_mut());
        if let Some(addr) = client_addr {
            append_forwarded_for(req.headers_mut(), addr.ip());
        }

        let mut response = timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| ProxyError::Timeout)?
            .map_err(|e| ProxyError::BackendError(e.to_string()))?;

        strip_hop_by_hop(response.headers_mut());
        Ok(response)
    }

    fn target_uri(&self, incoming: &Uri) -> Result<Uri, ProxyError> {
        let mut joined = join_paths(self.target.path(), incoming.path());

        match (self.target.query(), incoming.query()) {
            (Some(target_q), Some(req_q)) => {
                joined.push('?');
                joined.push_str(target_q);
                joined.push('&');
                joined.push_str(req_q);
            }
            (Some(q), None) | (None, Some(q)) => {
                joined.push('?');
                joined.push_str(q);
            }
            (None, None) => {}
        }

        let authority = &self.target[Position::BeforeHost..Position::AfterPort];
        format!("{}://{}{}", self.target.scheme(), authority, joined)
            .parse::<Uri>()
            .map_err(|e| ProxyError::InvalidUri(e.to_string()))
    }
}

/// Appends `path` to `base` with exactly one slash between them.
pub(crate) fn join_paths(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let header = HeaderName::from_static("x-forwarded-for");
    let prior: Vec<&str> = headers
        .get_all(&header)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(header, value);
    }
}
