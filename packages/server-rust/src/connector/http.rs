//! HTTP connector (`connector_impl = "http"`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use tokio::time::Instant;
use tracing::debug;

use tollgate_core::{Endpoint, EndpointType};

use super::ConnectorError;
use crate::pipeline::{Body, GatewayRequest, GatewayResponse};
use crate::traits::{Connector, ConnectorFactory};

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Removes hop-by-hop headers, including any listed in `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn backend_url(base: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}{path}", base.trim_end_matches('/'));
    if let Some(q) = query {
        url.push('?');
        url.push_str(q);
    }
    url
}

fn classify(err: &reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::UpstreamTimeout
    } else if err.is_connect() {
        ConnectorError::Connect(err.to_string())
    } else {
        ConnectorError::Upstream(err.to_string())
    }
}

/// Forwards requests over a pooled reqwest client. Redirects are returned to
/// the caller rather than followed.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialised.
    pub fn new(connect_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn forward(
        &self,
        request: GatewayRequest,
        endpoint: &Endpoint,
        deadline: Instant,
    ) -> Result<GatewayResponse, ConnectorError> {
        let url = backend_url(&endpoint.url, &request.path, request.query.as_deref());
        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        if let Some(addr) = request.remote_addr {
            if let Ok(value) = HeaderValue::from_str(&addr.to_string()) {
                headers.append(X_FORWARDED_FOR, value);
            }
        }

        // A streamed body keeps the client's Content-Length so it is sent with
        // the same framing; without one it goes out chunked.
        let body = match request.body {
            Body::Empty => {
                headers.remove(header::CONTENT_LENGTH);
                None
            }
            Body::Full(bytes) => {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                Some(reqwest::Body::from(bytes))
            }
            Body::Streaming(stream) => Some(reqwest::Body::wrap_stream(stream)),
        };
        let mut outbound = self.client.request(request.method, &url).headers(headers);
        if let Some(body) = body {
            outbound = outbound.body(body);
        }

        debug!(request_id = %request.request_id, %url, "forwarding to backend");
        let response = match tokio::time::timeout_at(deadline, outbound.send()).await {
            Err(_) => return Err(ConnectorError::UpstreamTimeout),
            Ok(Err(err)) => return Err(classify(&err)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        Ok(GatewayResponse {
            status,
            headers,
            body: Body::from_stream(response.bytes_stream()),
        })
    }
}

/// Connector factory serving only HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpConnectorFactory {
    http: Arc<HttpConnector>,
}

impl HttpConnectorFactory {
    #[must_use]
    pub fn new(http: HttpConnector) -> Self {
        Self {
            http: Arc::new(http),
        }
    }
}

impl ConnectorFactory for HttpConnectorFactory {
    fn connector(&self, endpoint_type: EndpointType) -> Option<Arc<dyn Connector>> {
        match endpoint_type {
            EndpointType::Http => Some(Arc::clone(&self.http) as Arc<dyn Connector>),
            _ => None,
        }
    }
}
