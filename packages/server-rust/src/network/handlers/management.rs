//! Management API: publish/retire services, register/unregister
//! applications, system status. Mounted under the admin prefix.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use tollgate_core::{Application, ApplicationKey, Service, ServiceKey};

use super::AppState;
use crate::engine::GatewayStats;
use crate::registry::RegistryError;

/// Registry errors as HTTP responses.
#[derive(Debug)]
pub struct ManagementError(RegistryError);

impl From<RegistryError> for ManagementError {
    fn from(err: RegistryError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ManagementError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            RegistryError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            RegistryError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            RegistryError::PolicyConfig(_) => (StatusCode::BAD_REQUEST, "policyConfig"),
            RegistryError::NotFound(_) => (StatusCode::NOT_FOUND, "notFound"),
        };
        let body = json!({ "error": kind, "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Installed {
    pub organization_id: String,
    pub id: String,
    pub version: String,
    pub revision: u64,
}

pub async fn put_service(
    State(state): State<AppState>,
    Json(service): Json<Service>,
) -> Result<Json<Installed>, ManagementError> {
    let published = state.gateway.publish_service(service)?;
    Ok(Json(Installed {
        organization_id: published.service.organization_id.clone(),
        id: published.service.service_id.clone(),
        version: published.service.version.clone(),
        revision: published.revision,
    }))
}

pub async fn delete_service(
    State(state): State<AppState>,
    Path((organization_id, service_id)): Path<(String, String)>,
) -> Result<StatusCode, ManagementError> {
    state
        .gateway
        .retire_service(&ServiceKey::new(organization_id, service_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn put_application(
    State(state): State<AppState>,
    Json(application): Json<Application>,
) -> Result<Json<Installed>, ManagementError> {
    let registered = state.gateway.register_application(application)?;
    Ok(Json(Installed {
        organization_id: registered.application.organization_id.clone(),
        id: registered.application.application_id.clone(),
        version: registered.application.version.clone(),
        revision: registered.revision,
    }))
}

pub async fn delete_application(
    State(state): State<AppState>,
    Path((organization_id, application_id)): Path<(String, String)>,
) -> Result<StatusCode, ManagementError> {
    state
        .gateway
        .unregister_application(&ApplicationKey::new(organization_id, application_id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub up: bool,
    pub version: &'static str,
    pub node_id: String,
    pub state: &'static str,
    pub in_flight: u64,
    #[serde(flatten)]
    pub stats: GatewayStats,
}

pub async fn system_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let health = state.shutdown.health_state();
    Json(SystemStatus {
        up: state.shutdown.is_accepting(),
        version: env!("CARGO_PKG_VERSION"),
        node_id: state.gateway.config().node_id.clone(),
        state: health.as_str(),
        in_flight: state.shutdown.in_flight_count(),
        stats: state.gateway.stats(),
    })
}
