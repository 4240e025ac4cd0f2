//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use crate::engine::{Gateway, GatewayConfig};
use crate::service::GatewayService;

/// Fully layered service handed to the HTTP front door.
pub type GatewayPipeline = MetricsService<LoadShedService<GatewayService>>;

/// Wraps the engine with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- span, counters and duration for every call, shed ones included
/// 2. `LoadShedLayer` -- reject when overloaded before doing any work
#[must_use]
pub fn build_gateway_pipeline(gateway: Arc<Gateway>, config: &GatewayConfig) -> GatewayPipeline {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(LoadShedLayer::new(config.max_concurrent_requests))
        .service(GatewayService::new(gateway))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};
    use tower::ServiceExt;

    use tollgate_core::{codes, FailureKind};

    use super::*;
    use crate::engine::GatewayBuilder;
    use crate::pipeline::GatewayRequest;
    use crate::service::GatewayCall;

    #[tokio::test]
    async fn unroutable_call_flows_through_all_layers() {
        let config = GatewayConfig::default();
        let gateway = Arc::new(GatewayBuilder::new(config.clone()).build().unwrap());
        let pipeline = build_gateway_pipeline(gateway, &config);

        let outcome = pipeline
            .oneshot(GatewayCall::new(GatewayRequest::new(Method::GET, "/missing")))
            .await
            .unwrap();

        assert_eq!(outcome.response.status, StatusCode::NOT_FOUND);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind(), FailureKind::NotFound);
        assert_eq!(failure.failure_code(), codes::SERVICE_NOT_FOUND);
    }

    #[tokio::test]
    async fn zero_capacity_sheds_everything() {
        let config = GatewayConfig {
            max_concurrent_requests: 0,
            ..GatewayConfig::default()
        };
        let gateway = Arc::new(GatewayBuilder::new(config.clone()).build().unwrap());
        let pipeline = build_gateway_pipeline(gateway, &config);

        let err = pipeline
            .oneshot(GatewayCall::new(GatewayRequest::new(Method::GET, "/echo")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Overloaded);
    }
}
