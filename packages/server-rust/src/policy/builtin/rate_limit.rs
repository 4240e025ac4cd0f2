//! Fixed-window request rate limiting over the shared-state store.
//!
//! Each window is its own counter key (`{bucket}@{window index}`), created
//! with a TTL of one window, so stale windows disappear on their own. The
//! counter is advanced with compare-and-swap: concurrent requests on any
//! node never lose an increment.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use http::{HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use tollgate_core::PolicyFailure;

use super::RATE_LIMITING;
use crate::pipeline::{GatewayRequest, GatewayResponse};
use crate::policy::{FailMode, Policy, PolicyContext};
use crate::state::Expiry;

/// Upper bound on CAS retries for one request. Running out always rejects:
/// contention means the store is reachable, so `failMode` does not apply.
const MAX_CAS_ATTEMPTS: usize = 32;

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// What a counter is shared between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One counter per calling application. Public (contract-less) calls
    /// fall back to the client address.
    Application,
    /// One counter for the whole service.
    Service,
    /// One counter per client address.
    Ip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatePeriod {
    Second,
    Minute,
    Hour,
    Day,
}

impl RatePeriod {
    #[must_use]
    pub fn as_secs(self) -> u64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub limit: u64,
    pub period: RatePeriod,
    pub granularity: Granularity,
    pub fail_mode: FailMode,
    /// Emit `X-RateLimit-*` headers on successful responses.
    #[serde(default = "headers_by_default")]
    pub headers: bool,
}

fn headers_by_default() -> bool {
    true
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

pub struct RateLimitPolicy {
    config: RateLimitConfig,
    clock: Clock,
}

impl RateLimitPolicy {
    /// # Errors
    ///
    /// Rejects a zero limit.
    pub fn from_config(config: RateLimitConfig) -> Result<Self, String> {
        if config.limit == 0 {
            return Err("limit must be greater than zero".to_string());
        }
        Ok(Self {
            config,
            clock: Arc::new(unix_now),
        })
    }

    /// Replaces the wall clock (seconds since the epoch).
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn bucket(&self, ctx: &PolicyContext) -> String {
        let ip = || {
            ctx.remote_addr()
                .map_or_else(|| "unknown".to_string(), |addr| addr.to_string())
        };
        match self.config.granularity {
            Granularity::Service => "service".to_string(),
            Granularity::Ip => format!("ip:{}", ip()),
            Granularity::Application => match ctx.application() {
                Some(app) => format!("app:{}", app.key()),
                None => format!("ip:{}", ip()),
            },
        }
    }

    fn attribute_key(ctx: &PolicyContext) -> String {
        format!("{}.remaining", ctx.current_policy().instance)
    }

    fn exceeded(&self, reset_in: u64) -> PolicyFailure {
        PolicyFailure::rate_limited(format!(
            "rate limit of {} per {:?} exceeded",
            self.config.limit, self.config.period
        ))
        .with_header("X-RateLimit-Limit", self.config.limit.to_string())
        .with_header("X-RateLimit-Remaining", "0")
        .with_header("X-RateLimit-Reset", reset_in.to_string())
        .with_header("Retry-After", reset_in.to_string())
    }
}

#[async_trait]
impl Policy for RateLimitPolicy {
    fn policy_type(&self) -> &str {
        RATE_LIMITING
    }

    async fn apply_request(
        &self,
        _request: &mut GatewayRequest,
        ctx: &mut PolicyContext,
    ) -> Result<(), PolicyFailure> {
        let window = self.config.period.as_secs();
        let now = (self.clock)();
        let index = now / window;
        let reset_in = window - now % window;
        let key = format!("{}@{index}", self.bucket(ctx));
        let state = ctx.state();

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = match state.get(&key).await {
                Ok(value) => value,
                Err(err) => return self.config.fail_mode.on_state_error(RATE_LIMITING, &err),
            };
            let count = current.as_ref().and_then(serde_json::Value::as_u64).unwrap_or(0);
            if count >= self.config.limit {
                debug!(bucket = %key, count, "rate limit exceeded");
                return Err(self.exceeded(reset_in));
            }

            let expiry = if current.is_some() {
                Expiry::Preserve
            } else {
                Expiry::After(Duration::from_secs(reset_in))
            };
            match state
                .compare_and_swap(&key, current.as_ref(), json!(count + 1), expiry)
                .await
            {
                Ok(true) => {
                    let remaining = self.config.limit - count - 1;
                    let attribute = Self::attribute_key(ctx);
                    ctx.set_attribute(attribute, json!([self.config.limit, remaining, reset_in]));
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => return self.config.fail_mode.on_state_error(RATE_LIMITING, &err),
            }
        }

        debug!(bucket = %key, "rate limit counter too contended");
        Err(PolicyFailure::state_unavailable(format!(
            "rate limit counter {key} too contended"
        ))
        .with_header("Retry-After", reset_in.to_string()))
    }

    async fn apply_response(
        &self,
        response: &mut GatewayResponse,
        ctx: &mut PolicyContext,
    ) -> Result<(), PolicyFailure> {
        if !self.config.headers {
            return Ok(());
        }
        let Some(values) = ctx
            .attribute(&Self::attribute_key(ctx))
            .and_then(serde_json::Value::as_array)
        else {
            return Ok(());
        };
        let headers = [LIMIT_HEADER, REMAINING_HEADER, RESET_HEADER];
        for (name, value) in headers.into_iter().zip(values) {
            if let Some(n) = value.as_u64() {
                response.headers.insert(name, HeaderValue::from(n));
            }
        }
        Ok(())
    }
}
