//! Policy executor: runs one request through its chain and the connector.
//!
//! ```text
//! Pending -> RequestPhase -> Forwarding -> ResponsePhase -> Complete
//!                 |              |              |
//!                 +------------> Failed <-------+ -> Complete
//! ```
//!
//! Every phase is bounded by its own deadline, measured from phase entry,
//! and raced against client cancellation and the overall request deadline.
//! A failure anywhere is translated exactly once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tollgate_core::{codes, Endpoint, PolicyFailure};

use super::{GatewayRequest, GatewayResponse};
use crate::connector::ConnectorError;
use crate::policy::{PolicyChain, PolicyContext};
use crate::traits::{ConnectorFactory, FailureTranslator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    RequestPhase,
    Forwarding,
    ResponsePhase,
    Failed,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub request_phase: Duration,
    pub upstream: Duration,
    pub response_phase: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            request_phase: Duration::from_secs(5),
            upstream: Duration::from_secs(30),
            response_phase: Duration::from_secs(5),
        }
    }
}

/// Result of one pipeline run. `response` is always well-formed: either the
/// backend's (after response policies) or the translated failure.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub response: GatewayResponse,
    pub trace: Vec<PipelineState>,
    pub failure: Option<PolicyFailure>,
    /// Whether the connector was invoked.
    pub forwarded: bool,
}

/// Races `work` against its phase deadline, client cancellation and the
/// overall request deadline. Losing the race drops `work`, which aborts any
/// I/O it had in flight.
async fn race<T>(
    work: impl Future<Output = Result<T, PolicyFailure>>,
    phase_deadline: Instant,
    on_timeout: impl FnOnce() -> PolicyFailure,
    cancel: &CancellationToken,
    request_deadline: Instant,
) -> Result<T, PolicyFailure> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(PolicyFailure::cancelled("client closed the connection")),
        () = tokio::time::sleep_until(request_deadline) => {
            Err(PolicyFailure::cancelled("request deadline elapsed"))
        }
        result = tokio::time::timeout_at(phase_deadline, work) => {
            result.unwrap_or_else(|_| Err(on_timeout()))
        }
    }
}

pub struct PolicyExecutor {
    connectors: Arc<dyn ConnectorFactory>,
    translator: Arc<dyn FailureTranslator>,
    timeouts: PhaseTimeouts,
}

impl PolicyExecutor {
    #[must_use]
    pub fn new(
        connectors: Arc<dyn ConnectorFactory>,
        translator: Arc<dyn FailureTranslator>,
        timeouts: PhaseTimeouts,
    ) -> Self {
        Self {
            connectors,
            translator,
            timeouts,
        }
    }

    #[must_use]
    pub fn translator(&self) -> &Arc<dyn FailureTranslator> {
        &self.translator
    }

    /// Runs `request` through `chain` and, if every request hook passes,
    /// forwards it to `endpoint` exactly once.
    pub async fn execute(
        &self,
        mut request: GatewayRequest,
        chain: &PolicyChain,
        ctx: &mut PolicyContext,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
        request_deadline: Instant,
    ) -> ExecutionOutcome {
        let mut trace = vec![PipelineState::Pending, PipelineState::RequestPhase];
        let request_id = request.request_id.clone();

        let limit = self.timeouts.request_phase;
        let request_phase = async {
            for entry in chain.entries() {
                ctx.enter(&entry.id);
                entry.policy.apply_request(&mut request, ctx).await?;
            }
            Ok::<(), PolicyFailure>(())
        };
        let passed = race(
            request_phase,
            Instant::now() + limit,
            || PolicyFailure::timeout(format!("request phase exceeded {limit:?}")),
            cancel,
            request_deadline,
        )
        .await;
        if let Err(failure) = passed {
            return self.fail(&request_id, trace, failure, false);
        }

        trace.push(PipelineState::Forwarding);
        let Some(connector) = self.connectors.connector(endpoint.endpoint_type) else {
            let failure = PolicyFailure::custom(
                codes::INTERNAL,
                format!("no connector for {} endpoints", endpoint.endpoint_type.as_str()),
            );
            return self.fail(&request_id, trace, failure, false);
        };
        debug!(request_id = %request_id, endpoint = %endpoint.url, "request phase passed, forwarding");
        let upstream_deadline = Instant::now() + self.timeouts.upstream;
        let forwarded = race(
            async {
                connector
                    .forward(request, endpoint, upstream_deadline)
                    .await
                    .map_err(PolicyFailure::from)
            },
            upstream_deadline,
            || ConnectorError::UpstreamTimeout.into(),
            cancel,
            request_deadline,
        )
        .await;
        let mut response = match forwarded {
            Ok(response) => response,
            Err(failure) => return self.fail(&request_id, trace, failure, true),
        };

        trace.push(PipelineState::ResponsePhase);
        let limit = self.timeouts.response_phase;
        let response_phase = async {
            for entry in chain.response_sequence() {
                ctx.enter(&entry.id);
                entry.policy.apply_response(&mut response, ctx).await?;
            }
            Ok::<(), PolicyFailure>(())
        };
        let passed = race(
            response_phase,
            Instant::now() + limit,
            || PolicyFailure::timeout(format!("response phase exceeded {limit:?}")),
            cancel,
            request_deadline,
        )
        .await;
        if let Err(failure) = passed {
            return self.fail(&request_id, trace, failure, true);
        }

        trace.push(PipelineState::Complete);
        debug!(request_id = %request_id, status = response.status.as_u16(), "pipeline complete");
        ExecutionOutcome {
            response,
            trace,
            failure: None,
            forwarded: true,
        }
    }

    /// Fails a request before it reaches the pipeline (unroutable, no
    /// contract). Translated exactly like a policy failure.
    #[must_use]
    pub fn reject(&self, request_id: &str, failure: PolicyFailure) -> ExecutionOutcome {
        self.fail(request_id, vec![PipelineState::Pending], failure, false)
    }

    fn fail(
        &self,
        request_id: &str,
        mut trace: Vec<PipelineState>,
        failure: PolicyFailure,
        forwarded: bool,
    ) -> ExecutionOutcome {
        let failed_in = trace.last().copied().unwrap_or(PipelineState::Pending);
        warn!(
            request_id = %request_id,
            phase = ?failed_in,
            kind = %failure.kind(),
            code = failure.failure_code(),
            message = failure.message(),
            "request failed"
        );
        metrics::counter!("tollgate_policy_failures_total", "kind" => failure.kind().as_str())
            .increment(1);

        trace.push(PipelineState::Failed);
        let response = self.translator.translate(&failure);
        trace.push(PipelineState::Complete);
        ExecutionOutcome {
            response,
            trace,
            failure: Some(failure),
            forwarded,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_doubles {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use http::StatusCode;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use tollgate_core::{Endpoint, EndpointType, PolicyFailure};

    use crate::connector::ConnectorError;
    use crate::failure::HttpFailureTranslator;
    use crate::pipeline::{GatewayRequest, GatewayResponse};
    use crate::policy::{Policy, PolicyContext};
    use crate::traits::{Connector, ConnectorFactory, FailureTranslator};

    /// Connector answering `200 "METHOD path"` after an optional delay.
    #[derive(Default)]
    pub(crate) struct CountingConnector {
        pub(crate) calls: AtomicUsize,
        pub(crate) delay: Option<Duration>,
        pub(crate) seen: Mutex<Vec<GatewayRequest>>,
    }

    impl CountingConnector {
        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn forward(
            &self,
            request: GatewayRequest,
            _endpoint: &Endpoint,
            _deadline: Instant,
        ) -> Result<GatewayResponse, ConnectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let body = format!("{} {}", request.method, request.path);
            self.seen.lock().push(request);
            Ok(GatewayResponse::new(StatusCode::OK).with_body(body))
        }
    }

    impl ConnectorFactory for Arc<CountingConnector> {
        fn connector(&self, endpoint_type: EndpointType) -> Option<Arc<dyn Connector>> {
            match endpoint_type {
                EndpointType::Http => Some(Arc::clone(self) as Arc<dyn Connector>),
                _ => None,
            }
        }
    }

    #[derive(Default)]
    pub(crate) struct CountingTranslator {
        pub(crate) calls: AtomicUsize,
    }

    impl FailureTranslator for CountingTranslator {
        fn translate(&self, failure: &PolicyFailure) -> GatewayResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            HttpFailureTranslator.translate(failure)
        }
    }

    /// Records its hook invocations into a shared journal and optionally
    /// fails or stalls.
    pub(crate) struct ScriptedPolicy {
        pub(crate) name: &'static str,
        pub(crate) journal: Arc<Mutex<Vec<String>>>,
        pub(crate) fail_request: bool,
        pub(crate) fail_response: bool,
        pub(crate) stall: Option<Duration>,
    }

    impl ScriptedPolicy {
        pub(crate) fn new(name: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                journal: Arc::clone(journal),
                fail_request: false,
                fail_response: false,
                stall: None,
            }
        }
    }

    #[async_trait]
    impl Policy for ScriptedPolicy {
        fn policy_type(&self) -> &str {
            self.name
        }

        async fn apply_request(
            &self,
            request: &mut GatewayRequest,
            _ctx: &mut PolicyContext,
        ) -> Result<(), PolicyFailure> {
            self.journal.lock().push(format!("req:{}", self.name));
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.fail_request {
                return Err(PolicyFailure::unauthorized(1, format!("{} says no", self.name)));
            }
            request.path = format!("{}/{}", request.path.trim_end_matches('/'), self.name);
            Ok(())
        }

        async fn apply_response(
            &self,
            _response: &mut GatewayResponse,
            _ctx: &mut PolicyContext,
        ) -> Result<(), PolicyFailure> {
            self.journal.lock().push(format!("resp:{}", self.name));
            if self.fail_response {
                return Err(PolicyFailure::custom(2, format!("{} rejects response", self.name)));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use http::{Method, StatusCode};
    use parking_lot::Mutex;

    use tollgate_core::{FailureKind, ResponseOrder};

    use super::test_doubles::{CountingConnector, CountingTranslator, ScriptedPolicy};
    use super::*;
    use crate::policy::{test_support, ChainEntry, Policy, PolicyId};

    use super::PipelineState::{Complete, Failed, Forwarding, Pending, RequestPhase, ResponsePhase};

    struct Harness {
        connector: Arc<CountingConnector>,
        translator: Arc<CountingTranslator>,
        executor: PolicyExecutor,
    }

    fn harness(connector: CountingConnector, timeouts: PhaseTimeouts) -> Harness {
        let connector = Arc::new(connector);
        let translator = Arc::new(CountingTranslator::default());
        let executor = PolicyExecutor::new(
            Arc::new(Arc::clone(&connector)),
            Arc::clone(&translator) as Arc<dyn FailureTranslator>,
            timeouts,
        );
        Harness {
            connector,
            translator,
            executor,
        }
    }

    fn chain(policies: Vec<ScriptedPolicy>, order: ResponseOrder) -> PolicyChain {
        let entries = policies
            .into_iter()
            .enumerate()
            .map(|(i, p)| ChainEntry {
                id: PolicyId::new("acme/echo", format!("service:{i}:{}", p.name)),
                policy: Arc::new(p) as Arc<dyn Policy>,
            })
            .collect();
        PolicyChain::new(entries, order)
    }

    fn endpoint() -> Endpoint {
        Endpoint::http("http://backend.invalid")
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(3_600)
    }

    async fn run(h: &Harness, chain: &PolicyChain) -> ExecutionOutcome {
        let mut ctx = test_support::context();
        h.executor
            .execute(
                GatewayRequest::new(Method::GET, "/hello"),
                chain,
                &mut ctx,
                &endpoint(),
                &CancellationToken::new(),
                far(),
            )
            .await
    }

    #[tokio::test]
    async fn passing_chain_forwards_once_and_wraps_the_call() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(
            vec![ScriptedPolicy::new("a", &journal), ScriptedPolicy::new("b", &journal)],
            ResponseOrder::Reverse,
        );
        let h = harness(CountingConnector::default(), PhaseTimeouts::default());

        let outcome = run(&h, &chain).await;

        assert_eq!(outcome.trace, vec![Pending, RequestPhase, Forwarding, ResponsePhase, Complete]);
        assert!(outcome.failure.is_none());
        assert!(outcome.forwarded);
        assert_eq!(h.connector.calls(), 1);
        assert_eq!(h.translator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*journal.lock(), vec!["req:a", "req:b", "resp:b", "resp:a"]);
        // request mutations reach the backend in order
        assert_eq!(h.connector.seen.lock()[0].path, "/hello/a/b");
        let body = outcome.response.body.collect().await.unwrap();
        assert_eq!(&body[..], b"GET /hello/a/b");
    }

    #[tokio::test]
    async fn forward_response_order_matches_request_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(
            vec![ScriptedPolicy::new("a", &journal), ScriptedPolicy::new("b", &journal)],
            ResponseOrder::Forward,
        );
        let h = harness(CountingConnector::default(), PhaseTimeouts::default());
        run(&h, &chain).await;
        assert_eq!(*journal.lock(), vec!["req:a", "req:b", "resp:a", "resp:b"]);
    }

    #[tokio::test]
    async fn request_failure_short_circuits_without_dispatch() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut gate = ScriptedPolicy::new("gate", &journal);
        gate.fail_request = true;
        let chain = chain(
            vec![ScriptedPolicy::new("a", &journal), gate, ScriptedPolicy::new("c", &journal)],
            ResponseOrder::Reverse,
        );
        let h = harness(CountingConnector::default(), PhaseTimeouts::default());

        let outcome = run(&h, &chain).await;

        assert_eq!(outcome.trace, vec![Pending, RequestPhase, Failed, Complete]);
        assert_eq!(h.connector.calls(), 0);
        assert!(!outcome.forwarded);
        assert_eq!(h.translator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(*journal.lock(), vec!["req:a", "req:gate"]);
    }

    #[tokio::test]
    async fn response_failure_happens_after_dispatch() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut picky = ScriptedPolicy::new("picky", &journal);
        picky.fail_response = true;
        let chain = chain(vec![ScriptedPolicy::new("a", &journal), picky], ResponseOrder::Reverse);
        let h = harness(CountingConnector::default(), PhaseTimeouts::default());

        let outcome = run(&h, &chain).await;

        assert_eq!(
            outcome.trace,
            vec![Pending, RequestPhase, Forwarding, ResponsePhase, Failed, Complete]
        );
        assert_eq!(h.connector.calls(), 1);
        assert!(outcome.forwarded);
        assert_eq!(h.translator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.response.status, StatusCode::INTERNAL_SERVER_ERROR);
        // the failing response hook stops the rest of the response phase
        assert_eq!(*journal.lock(), vec!["req:a", "req:picky", "resp:picky"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_policy_times_out_its_phase() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut slow = ScriptedPolicy::new("slow", &journal);
        slow.stall = Some(Duration::from_secs(60));
        let chain = chain(vec![slow], ResponseOrder::Reverse);
        let timeouts = PhaseTimeouts {
            request_phase: Duration::from_millis(200),
            ..PhaseTimeouts::default()
        };
        let h = harness(CountingConnector::default(), timeouts);

        let started = Instant::now();
        let outcome = run(&h, &chain).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(outcome.failure.as_ref().map(PolicyFailure::kind), Some(FailureKind::Timeout));
        assert_eq!(outcome.response.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(outcome.trace.last(), Some(&Complete));
        assert_eq!(h.connector.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn phase_deadline_starts_at_phase_entry() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut first = ScriptedPolicy::new("first", &journal);
        first.stall = Some(Duration::from_millis(150));
        let chain = chain(vec![first], ResponseOrder::Reverse);
        let connector = CountingConnector {
            delay: Some(Duration::from_millis(150)),
            ..CountingConnector::default()
        };
        // each phase fits its own budget even though the sum does not
        let timeouts = PhaseTimeouts {
            request_phase: Duration::from_millis(200),
            upstream: Duration::from_millis(200),
            response_phase: Duration::from_millis(200),
        };
        let h = harness(connector, timeouts);

        let outcome = run(&h, &chain).await;
        assert!(outcome.failure.is_none(), "{:?}", outcome.failure);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_is_an_upstream_timeout() {
        let connector = CountingConnector {
            delay: Some(Duration::from_secs(60)),
            ..CountingConnector::default()
        };
        let timeouts = PhaseTimeouts {
            upstream: Duration::from_millis(500),
            ..PhaseTimeouts::default()
        };
        let h = harness(connector, timeouts);

        let outcome = run(&h, &PolicyChain::default()).await;

        assert_eq!(
            outcome.failure.as_ref().map(PolicyFailure::kind),
            Some(FailureKind::UpstreamTimeout)
        );
        assert!(outcome.forwarded);
        assert_eq!(outcome.response.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_in_flight_backend_call() {
        let connector = CountingConnector {
            delay: Some(Duration::from_secs(60)),
            ..CountingConnector::default()
        };
        let h = harness(connector, PhaseTimeouts::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let mut ctx = test_support::context();
        let outcome = h
            .executor
            .execute(
                GatewayRequest::new(Method::GET, "/hello"),
                &PolicyChain::default(),
                &mut ctx,
                &endpoint(),
                &cancel,
                far(),
            )
            .await;

        assert_eq!(outcome.failure.as_ref().map(PolicyFailure::kind), Some(FailureKind::Cancelled));
        assert_eq!(outcome.response.status, StatusCode::SERVICE_UNAVAILABLE);
        // dispatched, then abandoned before it recorded the request
        assert_eq!(h.connector.calls(), 1);
        assert!(h.connector.seen.lock().is_empty());
        assert_eq!(h.translator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overall_deadline_cancels_the_request() {
        let connector = CountingConnector {
            delay: Some(Duration::from_secs(10)),
            ..CountingConnector::default()
        };
        let h = harness(connector, PhaseTimeouts::default());
        let mut ctx = test_support::context();

        let outcome = h
            .executor
            .execute(
                GatewayRequest::new(Method::GET, "/hello"),
                &PolicyChain::default(),
                &mut ctx,
                &endpoint(),
                &CancellationToken::new(),
                Instant::now() + Duration::from_secs(1),
            )
            .await;

        assert_eq!(outcome.failure.as_ref().map(PolicyFailure::kind), Some(FailureKind::Cancelled));
    }
}
