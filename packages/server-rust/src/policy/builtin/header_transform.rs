//! Sets and removes request/response headers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use tollgate_core::PolicyFailure;

use super::HEADER_TRANSFORM;
use crate::pipeline::{GatewayRequest, GatewayResponse};
use crate::policy::{Policy, PolicyContext};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeaderTransformConfig {
    #[serde(default)]
    pub set_request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub remove_request_headers: Vec<String>,
    #[serde(default)]
    pub set_response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub remove_response_headers: Vec<String>,
}

#[derive(Debug, Default)]
struct Edits {
    remove: Vec<HeaderName>,
    set: Vec<(HeaderName, HeaderValue)>,
}

impl Edits {
    fn parse(set: &BTreeMap<String, String>, remove: &[String]) -> Result<Self, String> {
        let remove = remove
            .iter()
            .map(|name| HeaderName::try_from(name.as_str()).map_err(|e| format!("{name:?}: {e}")))
            .collect::<Result<_, _>>()?;
        let set = set
            .iter()
            .map(|(name, value)| -> Result<(HeaderName, HeaderValue), String> {
                let parsed_name =
                    HeaderName::try_from(name.as_str()).map_err(|e| format!("{name:?}: {e}"))?;
                let parsed_value =
                    HeaderValue::try_from(value.as_str()).map_err(|e| format!("{name:?}: {e}"))?;
                Ok((parsed_name, parsed_value))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { remove, set })
    }

    /// Removals run first, so a header can be both removed and re-set.
    fn apply(&self, headers: &mut HeaderMap) {
        for name in &self.remove {
            headers.remove(name);
        }
        for (name, value) in &self.set {
            headers.insert(name.clone(), value.clone());
        }
    }
}

pub struct HeaderTransformPolicy {
    request: Edits,
    response: Edits,
}

impl HeaderTransformPolicy {
    /// # Errors
    ///
    /// Returns a message naming the first invalid header name or value.
    pub fn from_config(config: HeaderTransformConfig) -> Result<Self, String> {
        Ok(Self {
            request: Edits::parse(&config.set_request_headers, &config.remove_request_headers)?,
            response: Edits::parse(&config.set_response_headers, &config.remove_response_headers)?,
        })
    }
}

#[async_trait]
impl Policy for HeaderTransformPolicy {
    fn policy_type(&self) -> &str {
        HEADER_TRANSFORM
    }

    async fn apply_request(
        &self,
        request: &mut GatewayRequest,
        _ctx: &mut PolicyContext,
    ) -> Result<(), PolicyFailure> {
        self.request.apply(&mut request.headers);
        Ok(())
    }

    async fn apply_response(
        &self,
        response: &mut GatewayResponse,
        _ctx: &mut PolicyContext,
    ) -> Result<(), PolicyFailure> {
        self.response.apply(&mut response.headers);
        Ok(())
    }
}
