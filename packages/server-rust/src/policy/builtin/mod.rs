//! Policies shipped with the gateway, registered by `DefaultPolicyFactory::new`.

mod basic_auth;
mod header_transform;
mod ip_filter;
mod rate_limit;

pub use basic_auth::{BasicAuthConfig, BasicAuthPolicy};
pub use header_transform::{HeaderTransformConfig, HeaderTransformPolicy};
pub use ip_filter::{IpFilterConfig, IpFilterPolicy, IpRule};
pub use rate_limit::{Granularity, RateLimitConfig, RateLimitPolicy, RatePeriod};

pub const RATE_LIMITING: &str = "rate-limiting";
pub const IP_WHITELIST: &str = "ip-whitelist";
pub const IP_BLACKLIST: &str = "ip-blacklist";
pub const BASIC_AUTH: &str = "basic-auth";
pub const HEADER_TRANSFORM: &str = "header-transform";
