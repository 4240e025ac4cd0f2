//! Policy chain assembly.
//!
//! A chain is the contract's plan policies followed by the service's own
//! policies, disabled entries skipped. Chains are immutable and cached by
//! `(service, service revision, api key, application revision)`, so a
//! republish or re-registration never reuses a stale chain, and requests
//! already holding the old chain finish with it.

use std::fmt;
use std::sync::Arc;

use quick_cache::sync::Cache;
use tracing::debug;

use tollgate_core::{PolicyConfig, ResponseOrder, ServiceKey};

use super::{Policy, PolicyConfigError};
use crate::registry::{ContractBinding, PublishedService};
use crate::traits::PolicyFactory;

/// Identity of one policy instance: which key space its shared state lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyId {
    pub namespace: String,
    pub instance: String,
}

impl PolicyId {
    #[must_use]
    pub fn new(namespace: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            instance: instance.into(),
        }
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.namespace, self.instance)
    }
}

#[derive(Clone)]
pub struct ChainEntry {
    pub id: PolicyId,
    pub policy: Arc<dyn Policy>,
}

impl fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainEntry")
            .field("id", &self.id)
            .field("policy_type", &self.policy.policy_type())
            .finish()
    }
}

/// Ordered, immutable list of policy instances for one service/contract pair.
#[derive(Debug, Clone, Default)]
pub struct PolicyChain {
    entries: Vec<ChainEntry>,
    response_order: ResponseOrder,
}

impl PolicyChain {
    #[must_use]
    pub fn new(entries: Vec<ChainEntry>, response_order: ResponseOrder) -> Self {
        Self {
            entries,
            response_order,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Request-phase order.
    #[must_use]
    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    #[must_use]
    pub fn response_order(&self) -> ResponseOrder {
        self.response_order
    }

    /// Response-phase order.
    #[must_use]
    pub fn response_sequence(&self) -> Vec<&ChainEntry> {
        match self.response_order {
            ResponseOrder::Reverse => self.entries.iter().rev().collect(),
            ResponseOrder::Forward => self.entries.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChainKey {
    service: ServiceKey,
    service_revision: u64,
    contract: Option<(String, u64)>,
}

/// Builds and caches policy chains.
pub struct ChainBuilder {
    factory: Arc<dyn PolicyFactory>,
    cache: Cache<ChainKey, Arc<PolicyChain>>,
}

impl ChainBuilder {
    #[must_use]
    pub fn new(factory: Arc<dyn PolicyFactory>, capacity: usize) -> Self {
        Self {
            factory,
            cache: Cache::new(capacity.max(1)),
        }
    }

    /// Instantiates every entry once, discarding the results. Disabled
    /// entries are checked too, so enabling one later cannot break a chain.
    ///
    /// # Errors
    ///
    /// Returns the first configuration the factory rejects.
    pub fn validate(&self, policies: &[PolicyConfig]) -> Result<(), PolicyConfigError> {
        for config in policies {
            self.factory.create(config)?;
        }
        Ok(())
    }

    /// Returns the chain for `service` called under `contract`.
    ///
    /// # Errors
    ///
    /// Only if a configuration stopped validating after publish, which the
    /// default factory never does.
    pub fn build(
        &self,
        service: &PublishedService,
        contract: Option<&ContractBinding>,
    ) -> Result<Arc<PolicyChain>, PolicyConfigError> {
        let key = ChainKey {
            service: service.service.key(),
            service_revision: service.revision,
            contract: contract.map(|b| (b.contract().api_key.clone(), b.application.revision)),
        };
        if let Some(chain) = self.cache.get(&key) {
            return Ok(chain);
        }

        let namespace = key.service.to_string();
        let mut entries = Vec::new();
        if let Some(binding) = contract {
            let owner = binding.application.application.key();
            for (index, config) in binding.contract().policies.iter().enumerate() {
                if config.enabled {
                    let instance = format!("contract:{owner}:{index}:{}", config.policy_type);
                    entries.push(self.entry(&namespace, instance, config)?);
                }
            }
        }
        for (index, config) in service.service.policies.iter().enumerate() {
            if config.enabled {
                let instance = format!("service:{index}:{}", config.policy_type);
                entries.push(self.entry(&namespace, instance, config)?);
            }
        }

        let chain = Arc::new(PolicyChain::new(entries, service.service.response_order));
        debug!(
            service = %key.service,
            revision = key.service_revision,
            policies = chain.len(),
            "policy chain built"
        );
        self.cache.insert(key, Arc::clone(&chain));
        Ok(chain)
    }

    fn entry(
        &self,
        namespace: &str,
        instance: String,
        config: &PolicyConfig,
    ) -> Result<ChainEntry, PolicyConfigError> {
        Ok(ChainEntry {
            id: PolicyId::new(namespace, instance),
            policy: self.factory.create(config)?,
        })
    }

    /// Number of cached chains.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
