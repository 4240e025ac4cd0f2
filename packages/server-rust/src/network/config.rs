//! Listener configuration for the HTTP front door.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    /// 0 means OS-assigned.
    pub port: u16,
    pub tls: Option<TlsConfig>,
    /// How long shutdown waits for in-flight requests before giving up.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            tls: None,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// PEM certificate chain and private key.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_everywhere_on_an_ephemeral_port() {
        let config = NetworkConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 0);
        assert!(config.tls.is_none());
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }
}
