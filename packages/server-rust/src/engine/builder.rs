//! Composition root: resolves each capability to an implementation, either
//! injected directly or chosen by name from `GatewayConfig`.

use std::sync::Arc;

use tracing::info;

use super::config::{capability, ConfigError, GatewayConfig};
use super::Gateway;
use crate::connector::{HttpConnector, HttpConnectorFactory};
use crate::failure::HttpFailureTranslator;
use crate::pipeline::PolicyExecutor;
use crate::policy::{ChainBuilder, DefaultPolicyFactory};
use crate::registry::InMemoryRegistry;
use crate::state::InMemorySharedState;
use crate::traits::{ConnectorFactory, FailureTranslator, PolicyFactory, Registry, SharedStateStore};

pub const IN_MEMORY: &str = "in-memory";
pub const HTTP: &str = "http";
pub const DEFAULT: &str = "default";

pub struct GatewayBuilder {
    config: GatewayConfig,
    registry: Option<Arc<dyn Registry>>,
    state: Option<Arc<dyn SharedStateStore>>,
    connectors: Option<Arc<dyn ConnectorFactory>>,
    policies: Option<Arc<dyn PolicyFactory>>,
    translator: Option<Arc<dyn FailureTranslator>>,
}

fn unknown(capability: &str, implementation: &str) -> ConfigError {
    ConfigError::UnknownImplementation {
        capability: capability.to_string(),
        implementation: implementation.to_string(),
    }
}

impl GatewayBuilder {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            registry: None,
            state: None,
            connectors: None,
            policies: None,
            translator: None,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn with_state_store(mut self, state: Arc<dyn SharedStateStore>) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn with_connector_factory(mut self, connectors: Arc<dyn ConnectorFactory>) -> Self {
        self.connectors = Some(connectors);
        self
    }

    #[must_use]
    pub fn with_policy_factory(mut self, policies: Arc<dyn PolicyFactory>) -> Self {
        self.policies = Some(policies);
        self
    }

    #[must_use]
    pub fn with_failure_translator(mut self, translator: Arc<dyn FailureTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Resolves every capability and assembles the gateway.
    ///
    /// # Errors
    ///
    /// `UnknownImplementation` when a configured name has no built-in
    /// implementation, `Init` when one fails to start.
    pub fn build(self) -> Result<Gateway, ConfigError> {
        let config = self.config;
        let name = |cap: &str| config.implementation(cap).unwrap_or(DEFAULT).to_string();

        let registry = match self.registry {
            Some(registry) => registry,
            None => match name(capability::REGISTRY).as_str() {
                IN_MEMORY => Arc::new(InMemoryRegistry::new()) as Arc<dyn Registry>,
                other => return Err(unknown(capability::REGISTRY, other)),
            },
        };

        let state = match self.state {
            Some(state) => state,
            None => match name(capability::SHARED_STATE_STORE).as_str() {
                IN_MEMORY | DEFAULT => {
                    Arc::new(InMemorySharedState::new()) as Arc<dyn SharedStateStore>
                }
                other => return Err(unknown(capability::SHARED_STATE_STORE, other)),
            },
        };

        let connectors = match self.connectors {
            Some(connectors) => connectors,
            None => match name(capability::CONNECTOR_FACTORY).as_str() {
                HTTP => {
                    let http = HttpConnector::new(config.connect_timeout).map_err(|e| {
                        ConfigError::Init {
                            capability: capability::CONNECTOR_FACTORY.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    Arc::new(HttpConnectorFactory::new(http)) as Arc<dyn ConnectorFactory>
                }
                other => return Err(unknown(capability::CONNECTOR_FACTORY, other)),
            },
        };

        let policies = match self.policies {
            Some(policies) => policies,
            None => match name(capability::POLICY_FACTORY).as_str() {
                DEFAULT => Arc::new(DefaultPolicyFactory::new()) as Arc<dyn PolicyFactory>,
                other => return Err(unknown(capability::POLICY_FACTORY, other)),
            },
        };

        let translator = match self.translator {
            Some(translator) => translator,
            None => match name(capability::FAILURE_TRANSLATOR).as_str() {
                HTTP | DEFAULT => Arc::new(HttpFailureTranslator) as Arc<dyn FailureTranslator>,
                other => return Err(unknown(capability::FAILURE_TRANSLATOR, other)),
            },
        };

        let chains = ChainBuilder::new(policies, config.chain_cache_capacity);
        let executor = PolicyExecutor::new(
            Arc::clone(&connectors),
            translator,
            config.phase_timeouts(),
        );

        info!(
            node_id = %config.node_id,
            registry = %name(capability::REGISTRY),
            connector_factory = %name(capability::CONNECTOR_FACTORY),
            policy_factory = %name(capability::POLICY_FACTORY),
            "gateway assembled"
        );

        Ok(Gateway {
            config,
            registry,
            state,
            connectors,
            chains,
            executor,
        })
    }
}
