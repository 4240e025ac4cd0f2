//! HTTP Basic authentication against a static credential table.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::header::AUTHORIZATION;
use http::{HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;

use tollgate_core::{codes, PolicyFailure};

use super::BASIC_AUTH;
use crate::pipeline::GatewayRequest;
use crate::policy::{Policy, PolicyContext};

/// Context attribute holding the authenticated user name.
pub const IDENTITY_ATTRIBUTE: &str = "identity";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BasicAuthConfig {
    #[serde(default = "default_realm")]
    pub realm: String,
    /// User name to password.
    pub users: BTreeMap<String, String>,
    /// Header carrying the authenticated user name to the backend.
    #[serde(default)]
    pub forward_identity_header: Option<String>,
    /// Remove the `Authorization` header before forwarding.
    #[serde(default = "strip_by_default")]
    pub strip_authorization: bool,
}

fn default_realm() -> String {
    "tollgate".to_string()
}

fn strip_by_default() -> bool {
    true
}

pub struct BasicAuthPolicy {
    realm: String,
    users: BTreeMap<String, String>,
    forward_identity: Option<HeaderName>,
    strip_authorization: bool,
}

impl BasicAuthPolicy {
    /// # Errors
    ///
    /// Rejects an empty user table or an invalid identity header name.
    pub fn from_config(config: BasicAuthConfig) -> Result<Self, String> {
        if config.users.is_empty() {
            return Err("users must not be empty".to_string());
        }
        let forward_identity = config
            .forward_identity_header
            .as_deref()
            .map(HeaderName::try_from)
            .transpose()
            .map_err(|e| format!("forwardIdentityHeader: {e}"))?;
        Ok(Self {
            realm: config.realm,
            users: config.users,
            forward_identity,
            strip_authorization: config.strip_authorization,
        })
    }

    fn challenge(&self, code: u32, message: &str) -> PolicyFailure {
        PolicyFailure::unauthorized(code, message)
            .with_header("WWW-Authenticate", format!("Basic realm=\"{}\"", self.realm))
    }

    /// Checks a decoded `user:password` pair. The password comparison runs
    /// in constant time.
    fn verify(&self, user: &str, password: &str) -> bool {
        self.users
            .get(user)
            .is_some_and(|expected| bool::from(expected.as_bytes().ct_eq(password.as_bytes())))
    }
}

fn decode_credentials(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[async_trait]
impl Policy for BasicAuthPolicy {
    fn policy_type(&self) -> &str {
        BASIC_AUTH
    }

    async fn apply_request(
        &self,
        request: &mut GatewayRequest,
        ctx: &mut PolicyContext,
    ) -> Result<(), PolicyFailure> {
        let Some(header) = request.header(AUTHORIZATION.as_str()) else {
            return Err(self.challenge(codes::BASIC_AUTH_REQUIRED, "basic authentication required"));
        };
        let Some((user, password)) = decode_credentials(header) else {
            return Err(self.challenge(codes::BASIC_AUTH_FAILED, "malformed basic credentials"));
        };
        if !self.verify(&user, &password) {
            return Err(self.challenge(codes::BASIC_AUTH_FAILED, "invalid credentials"));
        }

        if self.strip_authorization {
            request.headers.remove(AUTHORIZATION);
        }
        if let Some(name) = &self.forward_identity {
            if let Ok(value) = HeaderValue::from_str(&user) {
                request.headers.insert(name.clone(), value);
            }
        }
        ctx.set_attribute(IDENTITY_ATTRIBUTE, json!(user));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use tollgate_core::FailureKind;

    use super::*;
    use crate::policy::test_support;

    fn policy() -> BasicAuthPolicy {
        BasicAuthPolicy::from_config(BasicAuthConfig {
            realm: "echo".into(),
            users: BTreeMap::from([("alice".to_string(), "s3cret".to_string())]),
            forward_identity_header: Some("X-Identity".into()),
            strip_authorization: true,
        })
        .unwrap()
    }

    fn with_auth(value: &str) -> GatewayRequest {
        GatewayRequest::new(Method::GET, "/echo")
            .with_header(AUTHORIZATION, HeaderValue::from_str(value).unwrap())
    }

    #[tokio::test]
    async fn missing_credentials_challenge_the_client() {
        let mut ctx = test_support::context();
        let mut req = GatewayRequest::new(Method::GET, "/echo");
        let failure = policy().apply_request(&mut req, &mut ctx).await.unwrap_err();

        assert_eq!(failure.kind(), FailureKind::Unauthorized);
        assert_eq!(failure.failure_code(), codes::BASIC_AUTH_REQUIRED);
        assert_eq!(
            failure.headers().get("WWW-Authenticate").map(String::as_str),
            Some("Basic realm=\"echo\"")
        );
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let mut ctx = test_support::context();
        let encoded = STANDARD.encode("alice:wrong");
        let mut req = with_auth(&format!("Basic {encoded}"));
        let failure = policy().apply_request(&mut req, &mut ctx).await.unwrap_err();
        assert_eq!(failure.failure_code(), codes::BASIC_AUTH_FAILED);

        let mut garbage = with_auth("Basic !!!");
        assert!(policy().apply_request(&mut garbage, &mut ctx).await.is_err());
    }

    #[tokio::test]
    async fn valid_credentials_forward_identity() {
        let mut ctx = test_support::context();
        let encoded = STANDARD.encode("alice:s3cret");
        let mut req = with_auth(&format!("basic {encoded}"));

        policy().apply_request(&mut req, &mut ctx).await.unwrap();

        assert!(req.headers.get(AUTHORIZATION).is_none());
        assert_eq!(req.header("x-identity"), Some("alice"));
        assert_eq!(ctx.attribute(IDENTITY_ATTRIBUTE), Some(&json!("alice")));
    }

    #[test]
    fn empty_user_table_is_rejected() {
        let config: BasicAuthConfig = serde_json::from_value(json!({ "users": {} })).unwrap();
        assert!(BasicAuthPolicy::from_config(config).is_err());
    }
}
