use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::{PolicyConfig, ResponseOrder};
use crate::route::RoutePattern;

/// Identity of a published service: organization plus service id.
///
/// The version tag is deliberately not part of the key: republishing a
/// service under a new version supersedes the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceKey {
    pub organization_id: String,
    pub service_id: String,
}

impl ServiceKey {
    #[must_use]
    pub fn new(organization_id: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            service_id: service_id.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.organization_id, self.service_id)
    }
}

/// Transport used to reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum EndpointType {
    #[default]
    Http,
}

impl EndpointType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
        }
    }
}

/// Backend location a service forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default)]
    pub endpoint_type: EndpointType,
    pub url: String,
}

impl Endpoint {
    #[must_use]
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            endpoint_type: EndpointType::Http,
            url: url.into(),
        }
    }
}

/// A published, routable unit.
///
/// Never mutated once published: the registry hands out `Arc<Service>`
/// snapshots and republishing installs a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub organization_id: String,
    pub service_id: String,
    pub version: String,
    pub route: RoutePattern,
    pub endpoint: Endpoint,
    /// Request-phase order.
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
    /// Callable without a contract.
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub response_order: ResponseOrder,
}

impl Service {
    /// Creates a non-public service with no policies.
    #[must_use]
    pub fn new(
        organization_id: impl Into<String>,
        service_id: impl Into<String>,
        version: impl Into<String>,
        route: RoutePattern,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            service_id: service_id.into(),
            version: version.into(),
            route,
            endpoint,
            policies: Vec::new(),
            public: false,
            response_order: ResponseOrder::default(),
        }
    }

    #[must_use]
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.organization_id, &self.service_id)
    }

    #[must_use]
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policies.push(policy);
        self
    }

    #[must_use]
    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    #[must_use]
    pub fn with_response_order(mut self, order: ResponseOrder) -> Self {
        self.response_order = order;
        self
    }
}

/// Version-agnostic reference from a contract to a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRef {
    pub organization_id: String,
    pub service_id: String,
}

impl ServiceRef {
    #[must_use]
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.organization_id, &self.service_id)
    }
}

impl From<ServiceKey> for ServiceRef {
    fn from(key: ServiceKey) -> Self {
        Self {
            organization_id: key.organization_id,
            service_id: key.service_id,
        }
    }
}

/// Grants an application access to one service under a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    /// Credential presented by callers (`X-API-Key` header or `apikey` query parameter).
    pub api_key: String,
    pub service: ServiceRef,
    #[serde(default)]
    pub plan: String,
    /// Plan policies, run before the service's own policies.
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

impl Contract {
    #[must_use]
    pub fn new(api_key: impl Into<String>, service: ServiceKey) -> Self {
        Self {
            api_key: api_key.into(),
            service: service.into(),
            plan: String::new(),
            policies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policies.push(policy);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationKey {
    pub organization_id: String,
    pub application_id: String,
}

impl ApplicationKey {
    #[must_use]
    pub fn new(organization_id: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            application_id: application_id.into(),
        }
    }
}

impl fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.organization_id, self.application_id)
    }
}

/// A registered consumer with its contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub organization_id: String,
    pub application_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub contracts: Vec<Contract>,
}

impl Application {
    #[must_use]
    pub fn new(organization_id: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            application_id: application_id.into(),
            version: String::new(),
            contracts: Vec::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> ApplicationKey {
        ApplicationKey::new(&self.organization_id, &self.application_id)
    }

    #[must_use]
    pub fn with_contract(mut self, contract: Contract) -> Self {
        self.contracts.push(contract);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_deserializes_with_defaults() {
        let json = serde_json::json!({
            "organizationId": "acme",
            "serviceId": "echo",
            "version": "1",
            "route": { "path": "/echo" },
            "endpoint": { "url": "http://localhost:7654" }
        });
        let service: Service = serde_json::from_value(json).unwrap();
        assert_eq!(service.key(), ServiceKey::new("acme", "echo"));
        assert_eq!(service.endpoint.endpoint_type, EndpointType::Http);
        assert!(service.policies.is_empty());
        assert!(!service.public);
        assert_eq!(service.response_order, ResponseOrder::Reverse);
    }

    #[test]
    fn application_contract_references_service_by_key() {
        let app = Application::new("acme", "app1")
            .with_contract(Contract::new("key-1", ServiceKey::new("acme", "echo")).with_plan("gold"));
        let json = serde_json::to_value(&app).unwrap();
        assert_eq!(json["contracts"][0]["apiKey"], "key-1");
        assert_eq!(json["contracts"][0]["service"]["serviceId"], "echo");
        assert_eq!(app.contracts[0].service.key(), ServiceKey::new("acme", "echo"));
    }

    #[test]
    fn keys_display_as_org_slash_id() {
        assert_eq!(ServiceKey::new("acme", "echo").to_string(), "acme/echo");
        assert_eq!(ApplicationKey::new("acme", "app1").to_string(), "acme/app1");
    }
}
