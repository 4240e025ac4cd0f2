//! Normalized request/response model that policies and connectors operate on.

use std::net::IpAddr;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};

use super::body::Body;

/// Inbound request after it left the transport, before it reaches a backend.
#[derive(Debug)]
pub struct GatewayRequest {
    pub request_id: String,
    pub method: Method,
    /// Path exactly as received by the front door.
    pub inbound_path: String,
    /// Path relative to the matched service route, always starting with `/`.
    /// Equal to `inbound_path` until the engine resolves a service.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub remote_addr: Option<IpAddr>,
    pub body: Body,
}

impl GatewayRequest {
    /// Creates a request from a method and an origin-form target (`/path?query`).
    #[must_use]
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, (!q.is_empty()).then(|| q.to_string())),
            None => (target, None),
        };
        let path = if path.is_empty() { "/" } else { path };
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            method,
            inbound_path: path.to_string(),
            path: path.to_string(),
            query,
            headers: HeaderMap::new(),
            remote_addr: None,
            body: Body::Empty,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Returns a header value if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Host the client addressed, port stripped and lowercased.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        let raw = self.header(http::header::HOST.as_str())?;
        let host = match raw.rsplit_once(':') {
            Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
            _ => raw,
        };
        Some(host.to_ascii_lowercase())
    }

    /// Returns the first value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// Swaps the body. The inbound `Content-Length` no longer describes it,
    /// so it is dropped; the connector frames a full body itself.
    pub fn replace_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
        self.headers.remove(http::header::CONTENT_LENGTH);
    }

    /// Drops every occurrence of a query parameter.
    pub fn remove_query_param(&mut self, name: &str) {
        let Some(query) = self.query.take() else {
            return;
        };
        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| pair.split('=').next() != Some(name))
            .collect();
        if !kept.is_empty() {
            self.query = Some(kept.join("&"));
        }
    }
}

/// Response travelling back through the response phase to the client.
#[derive(Debug)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl GatewayResponse {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }
}
