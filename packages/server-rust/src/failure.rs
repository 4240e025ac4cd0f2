//! Default failure translator (`failure_translator = "http"`).
//!
//! Every failure becomes a response with a status derived from its kind
//! (overridable per failure), `X-Policy-Failure-*` headers and a JSON body:
//!
//! ```json
//! { "type": "RateLimited", "failureCode": 10005, "responseCode": 429, "message": "..." }
//! ```

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde::Serialize;

use tollgate_core::{FailureKind, PolicyFailure};

use crate::pipeline::{Body, GatewayResponse};
use crate::traits::FailureTranslator;

pub const FAILURE_TYPE_HEADER: HeaderName = HeaderName::from_static("x-policy-failure-type");
pub const FAILURE_CODE_HEADER: HeaderName = HeaderName::from_static("x-policy-failure-code");
pub const FAILURE_MESSAGE_HEADER: HeaderName = HeaderName::from_static("x-policy-failure-message");

/// Default status for each failure kind.
#[must_use]
pub fn default_status(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::Unauthorized => StatusCode::UNAUTHORIZED,
        FailureKind::Forbidden => StatusCode::FORBIDDEN,
        FailureKind::NotFound => StatusCode::NOT_FOUND,
        FailureKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        FailureKind::Timeout | FailureKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::ConnectError | FailureKind::UpstreamError => StatusCode::BAD_GATEWAY,
        FailureKind::StateUnavailable | FailureKind::Cancelled | FailureKind::Overloaded => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        FailureKind::Custom => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    failure_code: u32,
    response_code: u16,
    message: &'a str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFailureTranslator;

impl FailureTranslator for HttpFailureTranslator {
    fn translate(&self, failure: &PolicyFailure) -> GatewayResponse {
        let status = failure
            .response_code()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or_else(|| default_status(failure.kind()));

        let mut response = GatewayResponse::new(status);
        let headers = &mut response.headers;
        for (name, value) in failure.headers() {
            if let (Ok(name), Ok(value)) =
                (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str()))
            {
                headers.insert(name, value);
            }
        }
        headers.insert(FAILURE_TYPE_HEADER, HeaderValue::from_static(failure.kind().as_str()));
        headers.insert(FAILURE_CODE_HEADER, HeaderValue::from(failure.failure_code()));
        // messages with control characters only go in the body
        if let Ok(value) = HeaderValue::try_from(failure.message()) {
            headers.insert(FAILURE_MESSAGE_HEADER, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = FailureBody {
            kind: failure.kind().as_str(),
            failure_code: failure.failure_code(),
            response_code: status.as_u16(),
            message: failure.message(),
        };
        response.body = serde_json::to_vec(&body).map_or(Body::Empty, |json| Body::Full(Bytes::from(json)));
        response
    }
}
