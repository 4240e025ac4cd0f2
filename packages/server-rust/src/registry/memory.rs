//! In-memory [`Registry`] implementation.
//!
//! Readers load an immutable [`Snapshot`] through `ArcSwap` and never block.
//! Writers serialize on a mutex, clone the current snapshot, apply their
//! change and swap the new snapshot in atomically, so a reader sees either
//! all of a publish or none of it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::info;

use tollgate_core::{normalize_path, Application, ApplicationKey, Service, ServiceKey};

use super::{
    ContractBinding, PublishedService, RegisteredApplication, RegistryError, RegistryStats,
    RouteMatch,
};
use crate::traits::Registry;

/// Canonical route identity: optional lowercase host plus normalised path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    host: Option<String>,
    path: String,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    services: HashMap<ServiceKey, Arc<PublishedService>>,
    routes: HashMap<RouteKey, ServiceKey>,
    applications: HashMap<ApplicationKey, Arc<RegisteredApplication>>,
    api_keys: HashMap<String, (ApplicationKey, usize)>,
}

impl Snapshot {
    fn route_owner(&self, key: &RouteKey) -> Option<&Arc<PublishedService>> {
        self.routes.get(key).and_then(|k| self.services.get(k))
    }
}

/// Copy-on-publish registry for a single gateway node.
pub struct InMemoryRegistry {
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
    revision: AtomicU64,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            write_lock: Mutex::new(()),
            revision: AtomicU64::new(0),
        }
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), RegistryError> {
    if value.trim().is_empty() {
        return Err(RegistryError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Yields `path` and each of its segment-aligned ancestors, longest first.
fn prefixes(path: &str) -> impl Iterator<Item = &str> {
    let mut next = Some(path);
    std::iter::from_fn(move || {
        let current = next?;
        next = match current.rfind('/') {
            Some(0) if current.len() > 1 => Some("/"),
            Some(0) | None => None,
            Some(idx) => Some(&current[..idx]),
        };
        Some(current)
    })
}

impl Registry for InMemoryRegistry {
    fn publish(&self, service: Service) -> Result<Arc<PublishedService>, RegistryError> {
        require_non_empty("organizationId", &service.organization_id)?;
        require_non_empty("serviceId", &service.service_id)?;
        require_non_empty("version", &service.version)?;
        require_non_empty("endpoint url", &service.endpoint.url)?;
        let route = service
            .route
            .canonical()
            .map_err(|e| RegistryError::Validation(e.to_string()))?;
        let route_key = RouteKey {
            host: route.host.clone(),
            path: route.path.clone(),
        };
        let key = service.key();

        let _guard = self.write_lock.lock();
        let current = self.snapshot.load_full();

        if let Some(owner) = current.route_owner(&route_key) {
            if owner.service.key() != key {
                return Err(RegistryError::Conflict(format!(
                    "route {route} is already published by {}",
                    owner.service.key()
                )));
            }
        }
        if let Some(active) = current.services.get(&key) {
            if active.service.version == service.version {
                return Err(RegistryError::Conflict(format!(
                    "{key} version {} is already published",
                    service.version
                )));
            }
        }

        let mut next = Snapshot::clone(&current);
        if let Some(previous) = next.services.get(&key) {
            if let Ok(old) = previous.service.route.canonical() {
                next.routes.remove(&RouteKey {
                    host: old.host,
                    path: old.path,
                });
            }
        }
        let published = Arc::new(PublishedService {
            service: Service { route, ..service },
            revision: self.next_revision(),
        });
        next.routes.insert(route_key, key.clone());
        next.services.insert(key.clone(), Arc::clone(&published));
        self.snapshot.store(Arc::new(next));

        info!(
            service = %key,
            version = %published.service.version,
            route = %published.service.route,
            revision = published.revision,
            "service published"
        );
        Ok(published)
    }

    fn retire(&self, key: &ServiceKey) -> Result<Arc<PublishedService>, RegistryError> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load_full();
        let Some(existing) = current.services.get(key).cloned() else {
            return Err(RegistryError::NotFound(format!("service {key}")));
        };

        let mut next = Snapshot::clone(&current);
        next.services.remove(key);
        next.routes.retain(|_, owner| owner != key);
        self.snapshot.store(Arc::new(next));

        info!(service = %key, version = %existing.service.version, "service retired");
        Ok(existing)
    }

    fn register(
        &self,
        application: Application,
    ) -> Result<Arc<RegisteredApplication>, RegistryError> {
        require_non_empty("organizationId", &application.organization_id)?;
        require_non_empty("applicationId", &application.application_id)?;
        let key = application.key();

        let _guard = self.write_lock.lock();
        let current = self.snapshot.load_full();

        let mut seen = HashSet::new();
        for contract in &application.contracts {
            require_non_empty("contract apiKey", &contract.api_key)?;
            if !seen.insert(contract.api_key.as_str()) {
                return Err(RegistryError::Validation(format!(
                    "api key {} appears in more than one contract",
                    contract.api_key
                )));
            }
            if let Some((owner, _)) = current.api_keys.get(&contract.api_key) {
                if *owner != key {
                    return Err(RegistryError::Validation(format!(
                        "api key {} is already bound to application {owner}",
                        contract.api_key
                    )));
                }
            }
            let service_key = contract.service.key();
            if !current.services.contains_key(&service_key) {
                return Err(RegistryError::Validation(format!(
                    "contract references unpublished service {service_key}"
                )));
            }
        }

        let mut next = Snapshot::clone(&current);
        next.api_keys.retain(|_, (owner, _)| *owner != key);
        for (index, contract) in application.contracts.iter().enumerate() {
            next.api_keys
                .insert(contract.api_key.clone(), (key.clone(), index));
        }
        let registered = Arc::new(RegisteredApplication {
            application,
            revision: self.next_revision(),
        });
        next.applications.insert(key.clone(), Arc::clone(&registered));
        self.snapshot.store(Arc::new(next));

        info!(
            application = %key,
            contracts = registered.application.contracts.len(),
            revision = registered.revision,
            "application registered"
        );
        Ok(registered)
    }

    fn unregister(
        &self,
        key: &ApplicationKey,
    ) -> Result<Arc<RegisteredApplication>, RegistryError> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load_full();
        let Some(existing) = current.applications.get(key).cloned() else {
            return Err(RegistryError::NotFound(format!("application {key}")));
        };

        let mut next = Snapshot::clone(&current);
        next.applications.remove(key);
        next.api_keys.retain(|_, (owner, _)| owner != key);
        self.snapshot.store(Arc::new(next));

        info!(application = %key, "application unregistered");
        Ok(existing)
    }

    fn resolve(&self, host: Option<&str>, path: &str) -> Result<RouteMatch, RegistryError> {
        let snapshot = self.snapshot.load();
        let path = normalize_path(path);
        let host = host.map(str::to_ascii_lowercase);

        for prefix in prefixes(&path) {
            let candidates = [
                host.clone().map(|h| RouteKey {
                    host: Some(h),
                    path: prefix.to_string(),
                }),
                Some(RouteKey {
                    host: None,
                    path: prefix.to_string(),
                }),
            ];
            for candidate in candidates.into_iter().flatten() {
                if let Some(service) = snapshot.route_owner(&candidate) {
                    let remainder = if prefix == "/" {
                        path.clone()
                    } else {
                        let rest = &path[prefix.len()..];
                        if rest.is_empty() { "/".to_string() } else { rest.to_string() }
                    };
                    return Ok(RouteMatch {
                        service: Arc::clone(service),
                        remainder,
                    });
                }
            }
        }
        Err(RegistryError::NotFound(format!("no service routes {path}")))
    }

    fn service(&self, key: &ServiceKey) -> Option<Arc<PublishedService>> {
        self.snapshot.load().services.get(key).cloned()
    }

    fn contract(&self, api_key: &str) -> Option<ContractBinding> {
        let snapshot = self.snapshot.load();
        let (owner, index) = snapshot.api_keys.get(api_key)?;
        let application = snapshot.applications.get(owner)?;
        Some(ContractBinding::new(Arc::clone(application), *index))
    }

    fn stats(&self) -> RegistryStats {
        let snapshot = self.snapshot.load();
        RegistryStats {
            services: snapshot.services.len(),
            applications: snapshot.applications.len(),
            contracts: snapshot.api_keys.len(),
        }
    }
}
