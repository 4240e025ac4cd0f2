//! Registry of published services and registered applications.
//!
//! - [`memory`]: copy-on-publish in-memory registry (`registry_impl = "in-memory"`)
//!
//! Records are handed out as `Arc` snapshots tagged with a registry-wide
//! revision, so a request keeps the exact version it resolved even if the
//! service is republished mid-flight.

pub mod memory;

use std::sync::Arc;

use tollgate_core::{Application, Contract, Service};

use crate::policy::PolicyConfigError;

pub use memory::InMemoryRegistry;

/// A service as installed by `publish`, with the revision that installed it.
#[derive(Debug)]
pub struct PublishedService {
    pub service: Service,
    pub revision: u64,
}

/// An application as installed by `register`.
#[derive(Debug)]
pub struct RegisteredApplication {
    pub application: Application,
    pub revision: u64,
}

/// A contract located by API key, together with its owning application.
#[derive(Debug, Clone)]
pub struct ContractBinding {
    pub application: Arc<RegisteredApplication>,
    index: usize,
}

impl ContractBinding {
    pub(crate) fn new(application: Arc<RegisteredApplication>, index: usize) -> Self {
        Self { application, index }
    }

    #[must_use]
    pub fn contract(&self) -> &Contract {
        &self.application.application.contracts[self.index]
    }
}

/// Result of route resolution.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub service: Arc<PublishedService>,
    /// Request path with the route prefix removed, always starting with `/`.
    pub remainder: String,
}

/// Point-in-time record counts, used by the status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    pub services: usize,
    pub applications: usize,
    pub contracts: usize,
}

/// Errors from publish/register/resolve. Never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    PolicyConfig(#[from] PolicyConfigError),
}
