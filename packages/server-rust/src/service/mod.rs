//! Tower service stack in front of the gateway engine.
//!
//! 1. **Middleware** (`middleware`): load shedding, metrics
//! 2. **Gateway service** (`GatewayService`): hands each call to [`Gateway::handle`]
//!
//! Requests shed by the middleware surface as `Err(PolicyFailure)`; the
//! front door translates them like any other failure.

pub mod middleware;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio_util::sync::CancellationToken;
use tower::Service;

use tollgate_core::PolicyFailure;

use crate::engine::Gateway;
use crate::pipeline::{ExecutionOutcome, GatewayRequest};

pub use middleware::{build_gateway_pipeline, GatewayPipeline, LoadShedLayer, MetricsLayer};

/// One proxied request plus the token cancelled when its client goes away.
#[derive(Debug)]
pub struct GatewayCall {
    pub request: GatewayRequest,
    pub cancel: CancellationToken,
}

impl GatewayCall {
    #[must_use]
    pub fn new(request: GatewayRequest) -> Self {
        Self {
            request,
            cancel: CancellationToken::new(),
        }
    }
}

/// Innermost service: runs the call through the engine.
#[derive(Debug, Clone)]
pub struct GatewayService {
    gateway: Arc<Gateway>,
}

impl GatewayService {
    #[must_use]
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

impl Service<GatewayCall> for GatewayService {
    type Response = ExecutionOutcome;
    type Error = PolicyFailure;
    type Future = Pin<Box<dyn Future<Output = Result<ExecutionOutcome, PolicyFailure>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: GatewayCall) -> Self::Future {
        let gateway = Arc::clone(&self.gateway);
        Box::pin(async move { Ok(gateway.handle(call.request, &call.cancel).await) })
    }
}
