//! Name-to-constructor policy factory (`policy_factory_impl = "default"`).

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use tollgate_core::PolicyConfig;

use super::builtin::{
    BasicAuthPolicy, HeaderTransformPolicy, IpFilterPolicy, RateLimitPolicy, BASIC_AUTH,
    HEADER_TRANSFORM, IP_BLACKLIST, IP_WHITELIST, RATE_LIMITING,
};
use super::{Policy, PolicyConfigError};
use crate::traits::PolicyFactory;

/// Builds a policy from its parsed JSON configuration, or explains why not.
pub type PolicyConstructor =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Policy>, String> + Send + Sync>;

/// Policy factory backed by a table of constructors keyed by type name.
///
/// `new()` registers the built-in policies; `register` adds or replaces
/// entries, so deployments can ship their own policy types.
#[derive(Clone)]
pub struct DefaultPolicyFactory {
    constructors: HashMap<String, PolicyConstructor>,
}

impl DefaultPolicyFactory {
    /// Factory with the built-in policy types registered.
    #[must_use]
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register_typed(RATE_LIMITING, RateLimitPolicy::from_config);
        factory.register_typed(IP_WHITELIST, IpFilterPolicy::allow_list);
        factory.register_typed(IP_BLACKLIST, IpFilterPolicy::deny_list);
        factory.register_typed(BASIC_AUTH, BasicAuthPolicy::from_config);
        factory.register_typed(HEADER_TRANSFORM, HeaderTransformPolicy::from_config);
        factory
    }

    /// Factory with no policy types at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers a constructor working on raw JSON.
    pub fn register<F>(&mut self, policy_type: impl Into<String>, constructor: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Policy>, String> + Send + Sync + 'static,
    {
        self.constructors
            .insert(policy_type.into(), Arc::new(constructor));
    }

    /// Registers a constructor taking a deserialized configuration struct.
    pub fn register_typed<C, P, F>(&mut self, policy_type: impl Into<String>, build: F)
    where
        C: DeserializeOwned,
        P: Policy + 'static,
        F: Fn(C) -> Result<P, String> + Send + Sync + 'static,
    {
        self.register(policy_type, move |raw: &serde_json::Value| {
            let config = C::deserialize(raw).map_err(|e| e.to_string())?;
            let policy = build(config)?;
            Ok(Arc::new(policy) as Arc<dyn Policy>)
        });
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn policy_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for DefaultPolicyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyFactory for DefaultPolicyFactory {
    fn create(&self, config: &PolicyConfig) -> Result<Arc<dyn Policy>, PolicyConfigError> {
        let constructor = self
            .constructors
            .get(&config.policy_type)
            .ok_or_else(|| PolicyConfigError::UnknownType(config.policy_type.clone()))?;

        let schema_error = |reason: String| PolicyConfigError::Schema {
            policy_type: config.policy_type.clone(),
            reason,
        };
        let raw = if config.configuration.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&config.configuration).map_err(|e| schema_error(e.to_string()))?
        };
        constructor(&raw).map_err(schema_error)
    }
}
