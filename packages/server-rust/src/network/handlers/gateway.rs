//! Front door: turns every non-admin HTTP request into a gateway call and
//! the outcome back into an HTTP response.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::error;

use tollgate_core::{codes, FailureKind, PolicyFailure};

use super::AppState;
use crate::network::middleware::REQUEST_ID_HEADER;
use crate::pipeline::{Body, GatewayRequest, GatewayResponse};
use crate::service::GatewayCall;

/// Fallback handler for everything outside the admin prefix.
///
/// The pipeline runs on its own task. If the client disconnects, this
/// future is dropped and the drop guard cancels the call, letting the
/// executor abandon its work and record the cancellation.
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let _in_flight = state.shutdown.in_flight_guard();
    let translator = state.gateway.executor().translator();

    if !state.shutdown.is_accepting() {
        let failure = PolicyFailure::new(
            FailureKind::Overloaded,
            codes::GATEWAY_OVERLOADED,
            "gateway is shutting down",
        );
        return into_response(translator.translate(&failure));
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let call = GatewayCall {
        request: into_gateway_request(request),
        cancel,
    };

    let response = match tokio::spawn(state.pipeline.clone().oneshot(call)).await {
        Ok(Ok(outcome)) => outcome.response,
        Ok(Err(failure)) => {
            metrics::counter!("tollgate_policy_failures_total", "kind" => failure.kind().as_str())
                .increment(1);
            translator.translate(&failure)
        }
        Err(join) => {
            error!(error = %join, "gateway task failed");
            translator.translate(&PolicyFailure::custom(codes::INTERNAL, "internal gateway error"))
        }
    };
    into_response(response)
}

fn into_gateway_request(request: Request) -> GatewayRequest {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let (parts, body) = request.into_parts();
    let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());

    let mut gateway_request = GatewayRequest::new(parts.method, target);
    gateway_request.headers = parts.headers;
    gateway_request.remote_addr = remote_addr;
    if let Some(id) = gateway_request.header(REQUEST_ID_HEADER) {
        gateway_request.request_id = id.to_string();
    }
    gateway_request.body = Body::from_stream(body.into_data_stream());
    gateway_request
}

fn into_response(response: GatewayResponse) -> Response {
    let body = match response.body {
        Body::Empty => axum::body::Body::empty(),
        Body::Full(bytes) => axum::body::Body::from(bytes),
        streaming @ Body::Streaming(_) => axum::body::Body::from_stream(streaming.into_stream()),
    };
    let mut out = Response::new(body);
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}
