//! Metrics middleware.
//!
//! Wraps each call in a `tracing` span and records the
//! `tollgate_requests_total{outcome}` counter and the
//! `tollgate_request_duration_seconds` histogram.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use tollgate_core::PolicyFailure;

use crate::pipeline::ExecutionOutcome;
use crate::service::GatewayCall;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label: `forwarded` for upstream responses that passed every
/// policy, `failed` for translated failures, `shed` for calls an outer layer
/// refused.
pub(crate) fn outcome_label(result: &Result<ExecutionOutcome, PolicyFailure>) -> &'static str {
    match result {
        Ok(outcome) if outcome.failure.is_none() => "forwarded",
        Ok(_) => "failed",
        Err(_) => "shed",
    }
}

impl<S> Service<GatewayCall> for MetricsService<S>
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
        let span = info_span!(
            "request",
            request_id = %call.request.request_id,
            method = %call.request.method,
            path = %call.request.inbound_path,
            status = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome_label(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);
                if let Ok(done) = &result {
                    span.record("status", done.response.status.as_u16());
                }

                metrics::counter!("tollgate_requests_total", "outcome" => outcome).increment(1);
                metrics::histogram!("tollgate_request_duration_seconds")
                    .record(elapsed.as_secs_f64());
                tracing::debug!(duration_ms, outcome, "request complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
