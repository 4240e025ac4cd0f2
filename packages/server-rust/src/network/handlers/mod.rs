//! HTTP handlers and the shared state they extract.

pub mod gateway;
pub mod health;
pub mod management;

pub use gateway::proxy_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use management::{
    delete_application, delete_service, put_application, put_service, system_status,
};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::engine::Gateway;
use crate::service::GatewayPipeline;

/// Shared state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// Layered service every proxied request goes through.
    pub pipeline: GatewayPipeline,
    pub shutdown: Arc<ShutdownController>,
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, shutdown: Arc<ShutdownController>) -> Self {
        let pipeline =
            crate::service::build_gateway_pipeline(Arc::clone(&gateway), gateway.config());
        Self {
            gateway,
            pipeline,
            shutdown,
            start_time: Instant::now(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::engine::{GatewayBuilder, GatewayConfig};

    pub(crate) fn test_state() -> AppState {
        let gateway = GatewayBuilder::new(GatewayConfig::default())
            .build()
            .unwrap();
        AppState::new(Arc::new(gateway), Arc::new(ShutdownController::new()))
    }
}
