//! Policy framework: the hook trait, per-request context, factory and chains.
//!
//! - [`factory`]: turns `PolicyConfig` entries into policy instances
//! - [`chain`]: ordered, cached policy chains per service/contract version
//! - [`builtin`]: policies shipped with the gateway

pub mod builtin;
pub mod chain;
pub mod factory;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use tollgate_core::{codes, Application, Contract, FailureKind, PolicyFailure, Service};

use crate::pipeline::{GatewayRequest, GatewayResponse};
use crate::registry::{ContractBinding, PublishedService};
use crate::state::{ScopedState, StateError};
use crate::traits::SharedStateStore;

pub use chain::{ChainBuilder, ChainEntry, PolicyChain, PolicyId};
pub use factory::DefaultPolicyFactory;

/// A unit of request/response processing.
///
/// Hooks signal rejection by returning `Err(PolicyFailure)`. They may await
/// I/O (shared state, external services); the executor bounds every hook by
/// the deadline of the phase it runs in.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Type name this instance was created from.
    fn policy_type(&self) -> &str;

    /// Runs before the backend call, in configured order.
    async fn apply_request(
        &self,
        request: &mut GatewayRequest,
        ctx: &mut PolicyContext,
    ) -> Result<(), PolicyFailure>;

    /// Runs after the backend call, in the chain's response order.
    ///
    /// The backend call has already happened when this runs, so rejecting
    /// here cannot undo its side effects.
    async fn apply_response(
        &self,
        _response: &mut GatewayResponse,
        _ctx: &mut PolicyContext,
    ) -> Result<(), PolicyFailure> {
        Ok(())
    }
}

/// Errors from validating a policy configuration at publish/register time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("unknown policy type: {0}")]
    UnknownType(String),
    #[error("invalid configuration for policy {policy_type}: {reason}")]
    Schema { policy_type: String, reason: String },
}

/// What a stateful policy does when the shared-state backend is unavailable.
///
/// There is no default: every stateful policy configuration names one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Reject the request.
    Closed,
    /// Let the request through without the state-backed check.
    Open,
}

impl FailMode {
    /// Applies this mode to a state error.
    ///
    /// # Errors
    ///
    /// Returns a `StateUnavailable` failure when failing closed.
    pub fn on_state_error(self, policy_type: &str, err: &StateError) -> Result<(), PolicyFailure> {
        match self {
            Self::Closed => Err(PolicyFailure::new(
                FailureKind::StateUnavailable,
                codes::STATE_UNAVAILABLE,
                format!("{policy_type}: {err}"),
            )),
            Self::Open => {
                warn!(policy = policy_type, error = %err, "shared state unavailable, failing open");
                Ok(())
            }
        }
    }
}

/// Per-request state visible to policies.
///
/// Created by the engine for one request and dropped when it completes.
/// Holds (never owns) the shared-state backend; the scoped handle is
/// re-targeted by the executor before each hook runs.
pub struct PolicyContext {
    request_id: String,
    service: Arc<PublishedService>,
    contract: Option<ContractBinding>,
    remote_addr: Option<IpAddr>,
    attributes: HashMap<String, serde_json::Value>,
    store: Arc<dyn SharedStateStore>,
    current: PolicyId,
}

impl PolicyContext {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        service: Arc<PublishedService>,
        contract: Option<ContractBinding>,
        remote_addr: Option<IpAddr>,
        store: Arc<dyn SharedStateStore>,
    ) -> Self {
        let current = PolicyId::new(service.service.key().to_string(), "gateway");
        Self {
            request_id: request_id.into(),
            service,
            contract,
            remote_addr,
            attributes: HashMap::new(),
            store,
            current,
        }
    }

    /// Points the scoped state handle at the given policy instance.
    pub fn enter(&mut self, id: &PolicyId) {
        self.current = id.clone();
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service.service
    }

    #[must_use]
    pub fn published_service(&self) -> &Arc<PublishedService> {
        &self.service
    }

    #[must_use]
    pub fn application(&self) -> Option<&Application> {
        self.contract.as_ref().map(|b| &b.application.application)
    }

    #[must_use]
    pub fn contract(&self) -> Option<&Contract> {
        self.contract.as_ref().map(ContractBinding::contract)
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    /// Identity of the policy whose hook is running.
    #[must_use]
    pub fn current_policy(&self) -> &PolicyId {
        &self.current
    }

    /// Shared state scoped to the running policy instance.
    #[must_use]
    pub fn state(&self) -> ScopedState {
        ScopedState::new(
            Arc::clone(&self.store),
            &self.current.namespace,
            &self.current.instance,
        )
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }
}

impl std::fmt::Debug for PolicyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyContext")
            .field("request_id", &self.request_id)
            .field("service", &self.service.service.key())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fail_mode_closed_rejects_and_open_passes() {
        let err = StateError::Unavailable("down".into());
        let failure = FailMode::Closed.on_state_error("rate-limiting", &err).unwrap_err();
        assert_eq!(failure.kind(), FailureKind::StateUnavailable);
        assert!(FailMode::Open.on_state_error("rate-limiting", &err).is_ok());
    }

    #[tokio::test]
    async fn enter_rescopes_state_handle() {
        let mut ctx = test_support::context();
        ctx.enter(&PolicyId::new("acme/echo", "service:0:a"));
        ctx.state().put("k", json!(1), crate::state::Expiry::Never).await.unwrap();

        ctx.enter(&PolicyId::new("acme/echo", "service:1:b"));
        assert_eq!(ctx.state().get("k").await.unwrap(), None);

        ctx.enter(&PolicyId::new("acme/echo", "service:0:a"));
        assert_eq!(ctx.state().get("k").await.unwrap(), Some(json!(1)));
    }

    #[test]
    fn attributes_round_trip() {
        let mut ctx = test_support::context();
        assert!(ctx.attribute("identity").is_none());
        ctx.set_attribute("identity", json!("alice"));
        assert_eq!(ctx.attribute("identity"), Some(&json!("alice")));
        assert_eq!(ctx.service().service_id, "echo");
        assert!(ctx.application().is_none());
    }
}
