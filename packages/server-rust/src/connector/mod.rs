//! Backend connectors, selected per endpoint type.
//!
//! - [`http`]: reqwest-based HTTP/1.1 and HTTP/2 forwarding

pub mod http;

use tollgate_core::{codes, FailureKind, PolicyFailure};

pub use self::http::{HttpConnector, HttpConnectorFactory};

/// Transport-level failure talking to a backend.
///
/// A backend answering with an error status is not a `ConnectorError`; the
/// response is passed back to the client as is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    #[error("cannot connect to backend: {0}")]
    Connect(String),
    #[error("backend did not respond before the deadline")]
    UpstreamTimeout,
    #[error("backend exchange failed: {0}")]
    Upstream(String),
}

impl From<ConnectorError> for PolicyFailure {
    fn from(err: ConnectorError) -> Self {
        let (kind, code) = match err {
            ConnectorError::Connect(_) => (FailureKind::ConnectError, codes::CONNECT_FAILED),
            ConnectorError::UpstreamTimeout => (FailureKind::UpstreamTimeout, codes::UPSTREAM_TIMEOUT),
            ConnectorError::Upstream(_) => (FailureKind::UpstreamError, codes::UPSTREAM_ERROR),
        };
        PolicyFailure::new(kind, code, err.to_string())
    }
}
