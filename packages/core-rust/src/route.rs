//! Route patterns: the host/path shape a `Service` is exposed under.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors from validating a route pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route path must start with '/': {0:?}")]
    NotAbsolute(String),
    #[error("route path must not contain query or fragment: {0:?}")]
    HasQuery(String),
    #[error("route path segment is not allowed: {0:?}")]
    BadSegment(String),
    #[error("route host is empty")]
    EmptyHost,
}

/// Exposed location of a service.
///
/// `path` is a segment-aligned prefix: `/echo` matches `/echo` and
/// `/echo/hello` but never `/echoes`. When `host` is set, the route only
/// matches requests whose `Host` header (port stripped, case-insensitive)
/// equals it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub path: String,
}

impl RoutePattern {
    /// Route on a path prefix, any host.
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            host: None,
            path: path.into(),
        }
    }

    /// Route on an explicit host and path prefix.
    #[must_use]
    pub fn host_and_path(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            path: path.into(),
        }
    }

    /// Returns the canonical form of this route (normalised path, lowercase host).
    ///
    /// # Errors
    ///
    /// Returns `RouteError` if the path is not absolute, carries a query or
    /// fragment, contains dot segments, or the host is empty.
    pub fn canonical(&self) -> Result<Self, RouteError> {
        if self.path.contains(['?', '#']) {
            return Err(RouteError::HasQuery(self.path.clone()));
        }
        if !self.path.starts_with('/') {
            return Err(RouteError::NotAbsolute(self.path.clone()));
        }
        let path = normalize_path(&self.path);
        if let Some(bad) = path.split('/').find(|s| is_dot_segment(s)) {
            return Err(RouteError::BadSegment(bad.to_string()));
        }
        let host = match &self.host {
            Some(h) if h.trim().is_empty() => return Err(RouteError::EmptyHost),
            Some(h) => Some(h.trim().to_ascii_lowercase()),
            None => None,
        };
        Ok(Self { host, path })
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{host}{}", self.path),
            None => write!(f, "*{}", self.path),
        }
    }
}

/// Collapses repeated slashes and strips a trailing slash (except for `/`).
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// `.` or `..`, also when percent-encoded (`%2e`, `.%2E`, ...).
#[must_use]
pub fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// True if any segment of `path` would be resolved away by a URL parser.
/// Backslashes count as separators, as they do for `http` URLs.
#[must_use]
pub fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(is_dot_segment)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn normalize_collapses_slashes() {
        assert_eq!(normalize_path("//echo///hello/"), "/echo/hello");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn dot_segments_are_found_in_any_spelling() {
        assert!(has_dot_segment("/pub/../private"));
        assert!(has_dot_segment("/pub/./x"));
        assert!(has_dot_segment("/pub/%2e%2E/private"));
        assert!(has_dot_segment("/pub/.%2e"));
        assert!(has_dot_segment("/pub/..\\private"));
        assert!(!has_dot_segment("/pub/..hidden/file.txt"));
        assert!(!has_dot_segment("/pub/%2e%2e%2e"));
        assert!(!has_dot_segment("/"));
    }

    #[test]
    fn canonical_lowercases_host() {
        let route = RoutePattern::host_and_path(" API.Example.com ", "/echo/").canonical().unwrap();
        assert_eq!(route.host.as_deref(), Some("api.example.com"));
        assert_eq!(route.path, "/echo");
    }

    #[test]
    fn canonical_rejects_relative_and_dot_segments() {
        assert!(matches!(
            RoutePattern::path("echo").canonical(),
            Err(RouteError::NotAbsolute(_))
        ));
        assert!(matches!(
            RoutePattern::path("/a/../b").canonical(),
            Err(RouteError::BadSegment(_))
        ));
        assert!(matches!(
            RoutePattern::path("/a/%2E%2e").canonical(),
            Err(RouteError::BadSegment(_))
        ));
        assert!(matches!(
            RoutePattern::path("/a?x=1").canonical(),
            Err(RouteError::HasQuery(_))
        ));
        assert!(matches!(
            RoutePattern::host_and_path("  ", "/a").canonical(),
            Err(RouteError::EmptyHost)
        ));
    }

    #[test]
    fn route_json_omits_missing_host() {
        let json = serde_json::to_value(RoutePattern::path("/echo")).unwrap();
        assert_eq!(json, serde_json::json!({ "path": "/echo" }));
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(segments in proptest::collection::vec("[a-z0-9]{0,6}", 0..6)) {
            let raw = format!("/{}", segments.join("/"));
            let once = normalize_path(&raw);
            prop_assert_eq!(normalize_path(&once), once.clone());
            prop_assert!(once.starts_with('/'));
            prop_assert!(once == "/" || !once.ends_with('/'));
        }
    }
}
