//! Gateway configuration and the named-option surface that feeds it.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::pipeline::PhaseTimeouts;

/// Capability names accepted in `component:<CapabilityName>` options.
pub mod capability {
    pub const REGISTRY: &str = "Registry";
    pub const CONNECTOR_FACTORY: &str = "ConnectorFactory";
    pub const POLICY_FACTORY: &str = "PolicyFactory";
    pub const SHARED_STATE_STORE: &str = "SharedStateStore";
    pub const FAILURE_TRANSLATOR: &str = "FailureTranslator";

    pub const ALL: [&str; 5] = [
        REGISTRY,
        CONNECTOR_FACTORY,
        POLICY_FACTORY,
        SHARED_STATE_STORE,
        FAILURE_TRANSLATOR,
    ];
}

const COMPONENT_PREFIX: &str = "component:";

/// Errors from parsing options or resolving implementations at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown configuration option: {0}")]
    UnknownOption(String),
    #[error("invalid value for {option}: {value:?}")]
    InvalidValue { option: String, value: String },
    #[error("unknown implementation {implementation:?} for capability {capability}")]
    UnknownImplementation {
        capability: String,
        implementation: String,
    },
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
    #[error("failed to initialise {capability}: {reason}")]
    Init { capability: String, reason: String },
}

/// Engine configuration, resolved once by the composition root.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Identifier of this gateway node, reported by the status endpoint.
    pub node_id: String,
    pub registry_impl: String,
    pub connector_factory_impl: String,
    pub policy_factory_impl: String,
    /// Port the front door listens on. 0 means OS-assigned.
    pub listen_port: u16,
    /// Capability name to implementation name for the remaining seams
    /// (`SharedStateStore`, `FailureTranslator`).
    pub components: BTreeMap<String, String>,
    pub request_phase_timeout: Duration,
    pub response_phase_timeout: Duration,
    /// Budget for the backend call, up to response headers.
    pub upstream_timeout: Duration,
    pub connect_timeout: Duration,
    /// Overall deadline for one request, across all phases.
    pub request_timeout: Duration,
    /// In-flight proxied requests before load shedding.
    pub max_concurrent_requests: u32,
    pub chain_cache_capacity: usize,
    pub state_sweep_interval: Duration,
    /// Path prefix reserved for health and management routes.
    pub admin_prefix: String,
    pub management_api: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            registry_impl: "in-memory".to_string(),
            connector_factory_impl: "http".to_string(),
            policy_factory_impl: "default".to_string(),
            listen_port: 8080,
            components: BTreeMap::from([
                (capability::SHARED_STATE_STORE.to_string(), "in-memory".to_string()),
                (capability::FAILURE_TRANSLATOR.to_string(), "http".to_string()),
            ]),
            request_phase_timeout: Duration::from_secs(5),
            response_phase_timeout: Duration::from_secs(5),
            upstream_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            max_concurrent_requests: 1000,
            chain_cache_capacity: 10_000,
            state_sweep_interval: Duration::from_secs(30),
            admin_prefix: "/_gateway".to_string(),
            management_api: true,
        }
    }
}

fn parse<T: std::str::FromStr>(option: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
    })
}

fn millis(option: &str, value: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(option, value).map(Duration::from_millis)
}

impl GatewayConfig {
    /// Builds a configuration from named options, starting from defaults.
    ///
    /// # Errors
    ///
    /// `UnknownOption` for unrecognised keys, `UnknownCapability` for a
    /// `component:` key naming no capability, `InvalidValue` for values that
    /// do not parse.
    pub fn from_options<I, K, V>(options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            config.apply(key.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Some(name) = key.strip_prefix(COMPONENT_PREFIX) {
            return self.set_component(name, value);
        }
        match key {
            "node_id" => self.node_id = value.to_string(),
            "registry_impl" => self.registry_impl = value.to_string(),
            "connector_factory_impl" => self.connector_factory_impl = value.to_string(),
            "policy_factory_impl" => self.policy_factory_impl = value.to_string(),
            "listen_port" => self.listen_port = parse(key, value)?,
            "request_phase_timeout_ms" => self.request_phase_timeout = millis(key, value)?,
            "response_phase_timeout_ms" => self.response_phase_timeout = millis(key, value)?,
            "upstream_timeout_ms" => self.upstream_timeout = millis(key, value)?,
            "connect_timeout_ms" => self.connect_timeout = millis(key, value)?,
            "request_timeout_ms" => self.request_timeout = millis(key, value)?,
            "max_concurrent_requests" => self.max_concurrent_requests = parse(key, value)?,
            "chain_cache_capacity" => self.chain_cache_capacity = parse(key, value)?,
            "state_sweep_interval_ms" => self.state_sweep_interval = millis(key, value)?,
            "admin_prefix" => {
                let prefix = tollgate_core::normalize_path(value);
                if prefix == "/" {
                    return Err(ConfigError::InvalidValue {
                        option: key.to_string(),
                        value: value.to_string(),
                    });
                }
                self.admin_prefix = prefix;
            }
            "management_api" => self.management_api = parse(key, value)?,
            _ => return Err(ConfigError::UnknownOption(key.to_string())),
        }
        Ok(())
    }

    /// `Registry`, `ConnectorFactory` and `PolicyFactory` alias the
    /// corresponding `*_impl` options.
    fn set_component(&mut self, capability: &str, implementation: &str) -> Result<(), ConfigError> {
        let implementation = implementation.to_string();
        match capability {
            capability::REGISTRY => self.registry_impl = implementation,
            capability::CONNECTOR_FACTORY => self.connector_factory_impl = implementation,
            capability::POLICY_FACTORY => self.policy_factory_impl = implementation,
            capability::SHARED_STATE_STORE | capability::FAILURE_TRANSLATOR => {
                self.components.insert(capability.to_string(), implementation);
            }
            other => return Err(ConfigError::UnknownCapability(other.to_string())),
        }
        Ok(())
    }

    /// Implementation chosen for a capability.
    #[must_use]
    pub fn implementation(&self, capability: &str) -> Option<&str> {
        match capability {
            capability::REGISTRY => Some(&self.registry_impl),
            capability::CONNECTOR_FACTORY => Some(&self.connector_factory_impl),
            capability::POLICY_FACTORY => Some(&self.policy_factory_impl),
            other => self.components.get(other).map(String::as_str),
        }
    }

    #[must_use]
    pub fn phase_timeouts(&self) -> PhaseTimeouts {
        PhaseTimeouts {
            request_phase: self.request_phase_timeout,
            upstream: self.upstream_timeout,
            response_phase: self.response_phase_timeout,
        }
    }
}
