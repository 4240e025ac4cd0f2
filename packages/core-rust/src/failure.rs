//! Structured rejections produced during request processing.
//!
//! A [`PolicyFailure`] is an expected outcome, not a crash: it is raised by a
//! policy (or manufactured by the pipeline for timeouts, cancellation and
//! connector faults) and always ends up as a translated protocol response.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric failure codes carried in translated responses.
pub mod codes {
    pub const SERVICE_NOT_FOUND: u32 = 10_001;
    pub const API_KEY_REQUIRED: u32 = 10_002;
    pub const NO_CONTRACT: u32 = 10_003;
    pub const INVALID_PATH: u32 = 10_004;
    pub const RATE_LIMIT_EXCEEDED: u32 = 10_005;
    pub const POLICY_TIMEOUT: u32 = 10_010;
    pub const REQUEST_CANCELLED: u32 = 10_011;
    pub const GATEWAY_OVERLOADED: u32 = 10_012;
    pub const CONNECT_FAILED: u32 = 10_020;
    pub const UPSTREAM_TIMEOUT: u32 = 10_021;
    pub const UPSTREAM_ERROR: u32 = 10_022;
    pub const STATE_UNAVAILABLE: u32 = 10_030;
    pub const BASIC_AUTH_REQUIRED: u32 = 10_040;
    pub const BASIC_AUTH_FAILED: u32 = 10_041;
    pub const IP_NOT_ALLOWED: u32 = 10_050;
    pub const INTERNAL: u32 = 10_099;
}

/// Classification of a failure; drives the default status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    Timeout,
    Cancelled,
    Overloaded,
    ConnectError,
    UpstreamTimeout,
    UpstreamError,
    StateUnavailable,
    Custom,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "NotFound",
            Self::RateLimited => "RateLimited",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::Overloaded => "Overloaded",
            Self::ConnectError => "ConnectError",
            Self::UpstreamTimeout => "UpstreamTimeout",
            Self::UpstreamError => "UpstreamError",
            Self::StateUnavailable => "StateUnavailable",
            Self::Custom => "Custom",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of why a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFailure {
    kind: FailureKind,
    failure_code: u32,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response_code: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
}

impl PolicyFailure {
    #[must_use]
    pub fn new(kind: FailureKind, failure_code: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            failure_code,
            message: message.into(),
            response_code: None,
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn unauthorized(failure_code: u32, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unauthorized, failure_code, message)
    }

    #[must_use]
    pub fn forbidden(failure_code: u32, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Forbidden, failure_code, message)
    }

    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RateLimited, codes::RATE_LIMIT_EXCEEDED, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, codes::POLICY_TIMEOUT, message)
    }

    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, codes::REQUEST_CANCELLED, message)
    }

    #[must_use]
    pub fn state_unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::StateUnavailable, codes::STATE_UNAVAILABLE, message)
    }

    #[must_use]
    pub fn custom(failure_code: u32, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Custom, failure_code, message)
    }

    /// Overrides the status the translator would pick for this kind.
    #[must_use]
    pub fn with_response_code(mut self, code: u16) -> Self {
        self.response_code = Some(code);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    #[must_use]
    pub fn failure_code(&self) -> u32 {
        self.failure_code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn response_code(&self) -> Option<u16> {
        self.response_code
    }

    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

impl fmt::Display for PolicyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.failure_code, self.message)
    }
}
