//! Capability traits the gateway engine is assembled from.
//!
//! Each seam has a default implementation selected by name in
//! `GatewayConfig`; tests substitute their own through `GatewayBuilder`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use tollgate_core::{
    Application, ApplicationKey, Endpoint, EndpointType, PolicyConfig, PolicyFailure, Service,
    ServiceKey,
};

use crate::connector::ConnectorError;
use crate::pipeline::{GatewayRequest, GatewayResponse};
use crate::policy::{Policy, PolicyConfigError};
use crate::registry::{
    ContractBinding, PublishedService, RegisteredApplication, RegistryError, RegistryStats,
    RouteMatch,
};
use crate::state::{Expiry, StateError, StateKey, StateValue};

/// Authoritative record of published services and registered applications.
///
/// Lookups are synchronous and must not block on writers.
pub trait Registry: Send + Sync {
    /// Installs or supersedes a service version.
    ///
    /// # Errors
    ///
    /// `Conflict` when the route belongs to another service or this version
    /// is already active; `Validation` for malformed records.
    fn publish(&self, service: Service) -> Result<Arc<PublishedService>, RegistryError>;

    /// Removes a service and its route.
    ///
    /// # Errors
    ///
    /// `NotFound` when the service is not published.
    fn retire(&self, key: &ServiceKey) -> Result<Arc<PublishedService>, RegistryError>;

    /// Installs or replaces an application and its contracts.
    ///
    /// # Errors
    ///
    /// `Validation` when a contract references an unpublished service or an
    /// API key owned by another application.
    fn register(
        &self,
        application: Application,
    ) -> Result<Arc<RegisteredApplication>, RegistryError>;

    /// # Errors
    ///
    /// `NotFound` when the application is not registered.
    fn unregister(&self, key: &ApplicationKey)
        -> Result<Arc<RegisteredApplication>, RegistryError>;

    /// Longest-prefix route match, host-specific routes first.
    ///
    /// # Errors
    ///
    /// `NotFound` when no published route covers the path.
    fn resolve(&self, host: Option<&str>, path: &str) -> Result<RouteMatch, RegistryError>;

    fn service(&self, key: &ServiceKey) -> Option<Arc<PublishedService>>;

    fn contract(&self, api_key: &str) -> Option<ContractBinding>;

    fn stats(&self) -> RegistryStats;
}

/// Key/value store shared by all requests (and, for distributed backends,
/// all gateway nodes).
///
/// Every operation is atomic per key. Failures surface as
/// `StateError::Unavailable`, never as a missing value.
#[async_trait]
pub trait SharedStateStore: Send + Sync {
    async fn get(&self, key: &StateKey) -> Result<Option<StateValue>, StateError>;

    async fn put(&self, key: &StateKey, value: StateValue, expiry: Expiry)
        -> Result<(), StateError>;

    /// Writes `new` only if the current value equals `expected`
    /// (`None` meaning absent or expired). Returns whether the write happened.
    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected: Option<&StateValue>,
        new: StateValue,
        expiry: Expiry,
    ) -> Result<bool, StateError>;

    async fn remove(&self, key: &StateKey) -> Result<Option<StateValue>, StateError>;

    /// Drops expired entries, returning how many were removed.
    /// Backends with native expiry leave this as a no-op.
    async fn purge_expired(&self) -> usize {
        0
    }
}

/// Forwards a request to one backend endpoint type.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Sends `request` to `endpoint`, abandoning the call at `deadline`.
    ///
    /// Non-2xx backend statuses are ordinary responses, not errors.
    async fn forward(
        &self,
        request: GatewayRequest,
        endpoint: &Endpoint,
        deadline: Instant,
    ) -> Result<GatewayResponse, ConnectorError>;
}

/// Selects a connector by endpoint type.
pub trait ConnectorFactory: Send + Sync {
    fn connector(&self, endpoint_type: EndpointType) -> Option<Arc<dyn Connector>>;

    fn supports(&self, endpoint_type: EndpointType) -> bool {
        self.connector(endpoint_type).is_some()
    }
}

/// Renders a policy failure as the client-facing response.
///
/// Must be deterministic: the same failure always yields the same response.
pub trait FailureTranslator: Send + Sync {
    fn translate(&self, failure: &PolicyFailure) -> GatewayResponse;
}

/// Creates policy instances from their configuration.
pub trait PolicyFactory: Send + Sync {
    /// # Errors
    ///
    /// `UnknownType` for unregistered policy types, `Schema` when the
    /// configuration does not fit the type.
    fn create(&self, config: &PolicyConfig) -> Result<Arc<dyn Policy>, PolicyConfigError>;
}
