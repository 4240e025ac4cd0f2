use serde::{Deserialize, Serialize};

/// One entry of an ordered policy list.
///
/// `configuration` is the policy-specific configuration serialized as JSON;
/// it is parsed and validated by the policy factory when the owning service
/// or application is published, never per request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    pub policy_type: String,
    #[serde(default)]
    pub configuration: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl PolicyConfig {
    #[must_use]
    pub fn new(policy_type: impl Into<String>, configuration: impl Into<String>) -> Self {
        Self {
            policy_type: policy_type.into(),
            configuration: configuration.into(),
            enabled: true,
        }
    }

    /// Builds an entry from a JSON value, serializing it as the configuration.
    #[must_use]
    pub fn json(policy_type: impl Into<String>, configuration: &serde_json::Value) -> Self {
        Self::new(policy_type, configuration.to_string())
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Order in which response hooks run relative to the request-phase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseOrder {
    /// Last request-phase policy sees the response first (policies wrap the call).
    #[default]
    Reverse,
    /// Same order as the request phase.
    Forward,
}
