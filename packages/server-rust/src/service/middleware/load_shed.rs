//! Load-shedding middleware.
//!
//! Rejects calls when more than `max_concurrent_requests` are in flight with
//! an `Overloaded` failure, translated to 503 by the front door.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};

use tollgate_core::{codes, FailureKind, PolicyFailure};

use crate::pipeline::ExecutionOutcome;
use crate::service::GatewayCall;

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer that limits concurrent calls via a semaphore.
///
/// When all permits are taken, incoming calls are rejected immediately
/// rather than queued.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: self.semaphore.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

fn overloaded() -> PolicyFailure {
    PolicyFailure::new(
        FailureKind::Overloaded,
        codes::GATEWAY_OVERLOADED,
        "gateway is at capacity",
    )
}

impl<S> Service<GatewayCall> for LoadShedService<S>
where
    S: Service<GatewayCall, Response = ExecutionOutcome, Error = PolicyFailure> + Send,
    S::Future: Send + 'static,
{
    type Response = ExecutionOutcome;
    type Error = PolicyFailure;
    type Future = Pin<Box<dyn Future<Output = Result<ExecutionOutcome, PolicyFailure>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: GatewayCall) -> Self::Future {
        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            return Box::pin(async { Err(overloaded()) });
        };

        let fut = self.inner.call(call);
        Box::pin(async move {
            // Held until the response (head) is produced.
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
