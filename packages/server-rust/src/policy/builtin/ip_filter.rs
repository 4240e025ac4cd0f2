//! Client address allow/deny lists (`ip-whitelist`, `ip-blacklist`).

use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;

use tollgate_core::{codes, PolicyFailure};

use super::{IP_BLACKLIST, IP_WHITELIST};
use crate::pipeline::GatewayRequest;
use crate::policy::{Policy, PolicyContext};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IpFilterConfig {
    /// Addresses or CIDR blocks (`10.0.0.0/8`, `::1`).
    pub ip_list: Vec<String>,
    /// Status returned on rejection instead of 403.
    #[serde(default)]
    pub response_code: Option<u16>,
}

/// A single address or a network prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRule {
    network: IpAddr,
    prefix: u8,
}

impl IpRule {
    /// IPv4-mapped IPv6 clients are matched as their IPv4 address.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
            v4 @ IpAddr::V4(_) => v4,
        };
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for IpRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };
        let network: IpAddr = addr.parse().map_err(|_| format!("invalid address {s:?}"))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| format!("invalid prefix length in {s:?}"))?,
            None => max,
        };
        // Mapped rules are stored as IPv4 so they line up with normalised clients.
        if let IpAddr::V6(v6) = network {
            if let (Some(v4), Some(v4_prefix)) = (v6.to_ipv4_mapped(), prefix.checked_sub(96)) {
                return Ok(Self {
                    network: IpAddr::V4(v4),
                    prefix: v4_prefix,
                });
            }
        }
        Ok(Self { network, prefix })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Allow,
    Deny,
}

pub struct IpFilterPolicy {
    mode: Mode,
    rules: Vec<IpRule>,
    response_code: Option<u16>,
}

impl IpFilterPolicy {
    /// Only listed addresses pass.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first unparseable entry.
    pub fn allow_list(config: IpFilterConfig) -> Result<Self, String> {
        Self::build(Mode::Allow, config)
    }

    /// Listed addresses are rejected.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first unparseable entry.
    pub fn deny_list(config: IpFilterConfig) -> Result<Self, String> {
        Self::build(Mode::Deny, config)
    }

    fn build(mode: Mode, config: IpFilterConfig) -> Result<Self, String> {
        let rules = config
            .ip_list
            .iter()
            .map(|entry| entry.parse())
            .collect::<Result<Vec<IpRule>, _>>()?;
        if let Some(code) = config.response_code {
            if !(400..600).contains(&code) {
                return Err(format!("responseCode {code} is not an error status"));
            }
        }
        Ok(Self {
            mode,
            rules,
            response_code: config.response_code,
        })
    }

    fn admits(&self, addr: Option<IpAddr>) -> bool {
        let listed = addr.is_some_and(|a| self.rules.iter().any(|rule| rule.contains(a)));
        match self.mode {
            Mode::Allow => listed,
            Mode::Deny => !listed,
        }
    }
}

#[async_trait]
impl Policy for IpFilterPolicy {
    fn policy_type(&self) -> &str {
        match self.mode {
            Mode::Allow => IP_WHITELIST,
            Mode::Deny => IP_BLACKLIST,
        }
    }

    async fn apply_request(
        &self,
        _request: &mut GatewayRequest,
        ctx: &mut PolicyContext,
    ) -> Result<(), PolicyFailure> {
        let addr = ctx.remote_addr();
        if self.admits(addr) {
            return Ok(());
        }
        let shown = addr.map_or_else(|| "unknown".to_string(), |a| a.to_string());
        let mut failure =
            PolicyFailure::forbidden(codes::IP_NOT_ALLOWED, format!("client address {shown} is not allowed"));
        if let Some(code) = self.response_code {
            failure = failure.with_response_code(code);
        }
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::Method;

    use tollgate_core::FailureKind;

    use super::*;
    use crate::policy::test_support;
    use crate::state::InMemorySharedState;

    fn config(list: &[&str]) -> IpFilterConfig {
        IpFilterConfig {
            ip_list: list.iter().map(ToString::to_string).collect(),
            response_code: None,
        }
    }

    fn ctx_from(addr: Option<&str>) -> PolicyContext {
        PolicyContext::new(
            "r",
            test_support::published(test_support::echo_service()),
            None,
            addr.map(|a| a.parse().unwrap()),
            Arc::new(InMemorySharedState::new()),
        )
    }

    #[test]
    fn cidr_rules_match_prefixes() {
        let rule: IpRule = "10.1.0.0/16".parse().unwrap();
        assert!(rule.contains("10.1.200.3".parse().unwrap()));
        assert!(!rule.contains("10.2.0.1".parse().unwrap()));

        let any: IpRule = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains("192.168.1.1".parse().unwrap()));

        let v6: IpRule = "fd00::/8".parse().unwrap();
        assert!(v6.contains("fd12::1".parse().unwrap()));
        assert!(!v6.contains("10.1.0.1".parse().unwrap()));
    }

    #[test]
    fn mapped_v4_addresses_match_v4_rules() {
        let rule: IpRule = "127.0.0.1".parse().unwrap();
        assert!(rule.contains("::ffff:127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn mapped_rules_match_v4_clients() {
        let host: IpRule = "::ffff:10.0.0.1".parse().unwrap();
        assert!(host.contains("10.0.0.1".parse().unwrap()));
        assert!(host.contains("::ffff:10.0.0.1".parse().unwrap()));
        assert!(!host.contains("10.0.0.2".parse().unwrap()));

        let block: IpRule = "::ffff:10.0.0.0/104".parse().unwrap();
        assert_eq!(block, "10.0.0.0/8".parse().unwrap());
        assert!(block.contains("10.200.1.1".parse().unwrap()));
    }

    #[test]
    fn bad_entries_are_rejected() {
        assert!("10.0.0.0/33".parse::<IpRule>().is_err());
        assert!("not-an-ip".parse::<IpRule>().is_err());
        assert!(IpFilterPolicy::deny_list(config(&["10.0.0.1", "nope"])).is_err());
    }

    #[tokio::test]
    async fn whitelist_rejects_unlisted_and_unknown_clients() {
        let policy = IpFilterPolicy::allow_list(config(&["127.0.0.1"])).unwrap();
        let mut req = GatewayRequest::new(Method::GET, "/echo");

        assert!(policy.apply_request(&mut req, &mut ctx_from(Some("127.0.0.1"))).await.is_ok());
        let failure = policy
            .apply_request(&mut req, &mut ctx_from(Some("10.0.0.9")))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), FailureKind::Forbidden);
        assert_eq!(failure.failure_code(), codes::IP_NOT_ALLOWED);
        assert!(policy.apply_request(&mut req, &mut ctx_from(None)).await.is_err());
    }

    #[tokio::test]
    async fn blacklist_uses_configured_response_code() {
        let policy = IpFilterPolicy::deny_list(IpFilterConfig {
            ip_list: vec!["10.0.0.0/8".into()],
            response_code: Some(404),
        })
        .unwrap();
        let mut req = GatewayRequest::new(Method::GET, "/echo");

        let failure = policy
            .apply_request(&mut req, &mut ctx_from(Some("10.9.9.9")))
            .await
            .unwrap_err();
        assert_eq!(failure.response_code(), Some(404));
        assert!(policy.apply_request(&mut req, &mut ctx_from(Some("192.168.0.1"))).await.is_ok());
        assert_eq!(policy.policy_type(), IP_BLACKLIST);
    }
}
