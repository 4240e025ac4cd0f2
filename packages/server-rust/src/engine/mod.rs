//! Gateway engine: the composition of registry, chain builder, executor and
//! shared state behind the publish/register operations and request handling.
//!
//! - [`config`]: `GatewayConfig` and named options
//! - [`builder`]: composition root resolving capabilities by name

pub mod builder;
pub mod config;

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tollgate_core::{
    codes, has_dot_segment, Application, ApplicationKey, FailureKind, PolicyFailure, Service,
    ServiceKey,
};

pub use builder::GatewayBuilder;
pub use config::{capability, ConfigError, GatewayConfig};

use crate::pipeline::{ExecutionOutcome, GatewayRequest, PolicyExecutor};
use crate::policy::{ChainBuilder, PolicyContext};
use crate::registry::{
    ContractBinding, PublishedService, RegisteredApplication, RegistryError, RegistryStats,
};
use crate::state::{ExpirySweeper, SweepTask};
use crate::traits::{ConnectorFactory, Registry, SharedStateStore};
use crate::worker::BackgroundWorker;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Query parameter alternative to [`API_KEY_HEADER`]; removed before forwarding.
pub const API_KEY_PARAM: &str = "apikey";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    #[serde(flatten)]
    pub registry: RegistryStats,
    pub cached_chains: usize,
}

pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<dyn Registry>,
    state: Arc<dyn SharedStateStore>,
    connectors: Arc<dyn ConnectorFactory>,
    chains: ChainBuilder,
    executor: PolicyExecutor,
}

impl Gateway {
    #[must_use]
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub fn executor(&self) -> &PolicyExecutor {
        &self.executor
    }

    #[must_use]
    pub fn state_store(&self) -> Arc<dyn SharedStateStore> {
        Arc::clone(&self.state)
    }

    /// Whether `path` falls under the reserved admin prefix.
    #[must_use]
    pub fn is_reserved(&self, path: &str) -> bool {
        let prefix = self.config.admin_prefix.as_str();
        path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Validates a service's policies and endpoint, then publishes it.
    ///
    /// # Errors
    ///
    /// `PolicyConfig` for invalid policy entries, `Validation` for an
    /// unsupported endpoint type or a reserved route, otherwise whatever the
    /// registry reports.
    pub fn publish_service(&self, service: Service) -> Result<Arc<PublishedService>, RegistryError> {
        let route = service
            .route
            .canonical()
            .map_err(|e| RegistryError::Validation(e.to_string()))?;
        if self.is_reserved(&route.path) {
            return Err(RegistryError::Validation(format!(
                "route {route} is reserved for the gateway"
            )));
        }
        if !self.connectors.supports(service.endpoint.endpoint_type) {
            return Err(RegistryError::Validation(format!(
                "no connector for {} endpoints",
                service.endpoint.endpoint_type.as_str()
            )));
        }
        self.chains.validate(&service.policies)?;
        self.registry.publish(service)
    }

    /// # Errors
    ///
    /// `NotFound` when the service is not published.
    pub fn retire_service(&self, key: &ServiceKey) -> Result<Arc<PublishedService>, RegistryError> {
        self.registry.retire(key)
    }

    /// Validates every contract's plan policies, then registers.
    ///
    /// # Errors
    ///
    /// `PolicyConfig` for invalid plan policies, otherwise whatever the
    /// registry reports.
    pub fn register_application(
        &self,
        application: Application,
    ) -> Result<Arc<RegisteredApplication>, RegistryError> {
        for contract in &application.contracts {
            self.chains.validate(&contract.policies)?;
        }
        self.registry.register(application)
    }

    /// # Errors
    ///
    /// `NotFound` when the application is not registered.
    pub fn unregister_application(
        &self,
        key: &ApplicationKey,
    ) -> Result<Arc<RegisteredApplication>, RegistryError> {
        self.registry.unregister(key)
    }

    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            registry: self.registry.stats(),
            cached_chains: self.chains.cached(),
        }
    }

    /// Starts the shared-state expiry sweeper.
    #[must_use]
    pub fn spawn_maintenance(&self) -> BackgroundWorker<ExpirySweeper> {
        BackgroundWorker::start(
            ExpirySweeper::new(self.state_store()),
            self.config.state_sweep_interval,
        )
    }

    /// Processes one inbound request end to end.
    ///
    /// Resolution and contract failures are translated like any policy
    /// failure; the returned outcome always carries a well-formed response.
    /// Paths with dot segments are refused before resolution, since a
    /// backend URL parser would climb out of the matched route.
    pub async fn handle(
        &self,
        mut request: GatewayRequest,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let deadline = Instant::now() + self.config.request_timeout;

        if has_dot_segment(&request.path) {
            let failure = PolicyFailure::new(
                FailureKind::NotFound,
                codes::INVALID_PATH,
                "request path contains dot segments",
            )
            .with_response_code(400);
            return self.executor.reject(&request.request_id, failure);
        }

        let host = request.host();
        let matched = match self.registry.resolve(host.as_deref(), &request.path) {
            Ok(matched) => matched,
            Err(err) => {
                let failure =
                    PolicyFailure::new(FailureKind::NotFound, codes::SERVICE_NOT_FOUND, err.to_string());
                return self.executor.reject(&request.request_id, failure);
            }
        };
        let service = matched.service;

        let api_key = request
            .header(API_KEY_HEADER)
            .or_else(|| request.query_param(API_KEY_PARAM))
            .map(str::to_string);
        request.headers.remove(API_KEY_HEADER);
        request.remove_query_param(API_KEY_PARAM);

        let binding = match self.authorize(&service, api_key.as_deref()) {
            Ok(binding) => binding,
            Err(failure) => return self.executor.reject(&request.request_id, failure),
        };

        let chain = match self.chains.build(&service, binding.as_ref()) {
            Ok(chain) => chain,
            Err(err) => {
                let failure = PolicyFailure::custom(codes::INTERNAL, err.to_string());
                return self.executor.reject(&request.request_id, failure);
            }
        };

        debug!(
            request_id = %request.request_id,
            service = %service.service.key(),
            revision = service.revision,
            policies = chain.len(),
            "request matched"
        );
        request.path = matched.remainder;
        let mut ctx = PolicyContext::new(
            request.request_id.clone(),
            Arc::clone(&service),
            binding,
            request.remote_addr,
            Arc::clone(&self.state),
        );
        self.executor
            .execute(request, &chain, &mut ctx, &service.service.endpoint, cancel, deadline)
            .await
    }

    /// Finds the caller's contract for `service`. Public services admit
    /// callers without one.
    fn authorize(
        &self,
        service: &PublishedService,
        api_key: Option<&str>,
    ) -> Result<Option<ContractBinding>, PolicyFailure> {
        let binding = api_key
            .and_then(|key| self.registry.contract(key))
            .filter(|b| b.contract().service.key() == service.service.key());
        match (binding, api_key) {
            (Some(binding), _) => Ok(Some(binding)),
            (None, _) if service.service.public => Ok(None),
            (None, None) => Err(PolicyFailure::forbidden(
                codes::API_KEY_REQUIRED,
                format!("an API key is required to call {}", service.service.key()),
            )),
            (None, Some(_)) => Err(PolicyFailure::forbidden(
                codes::NO_CONTRACT,
                format!("no active contract for {}", service.service.key()),
            )),
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("node_id", &self.config.node_id)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Submits an immediate sweep; used on shutdown to leave a tidy store.
pub async fn sweep_now(worker: &BackgroundWorker<ExpirySweeper>) {
    if worker.submit(SweepTask::Now).await.is_err() {
        debug!("expiry sweeper already stopped");
    }
}
