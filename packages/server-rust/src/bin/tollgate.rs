//! `tollgate` binary: parses flags and environment, assembles the gateway
//! and serves until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate_server::engine::{sweep_now, GatewayBuilder, GatewayConfig};
use tollgate_server::network::{NetworkConfig, NetworkModule, TlsConfig};

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Policy-enforcing API gateway")]
struct Args {
    /// Bind address.
    #[arg(long, env = "TOLLGATE_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "TOLLGATE_PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "TOLLGATE_NODE_ID", default_value = "tollgate-1")]
    node_id: String,

    #[arg(long, env = "TOLLGATE_ADMIN_PREFIX", default_value = "/_gateway")]
    admin_prefix: String,

    /// Disable the management API (health routes stay up).
    #[arg(long, env = "TOLLGATE_NO_MANAGEMENT_API")]
    no_management_api: bool,

    #[arg(long, env = "TOLLGATE_MAX_CONCURRENT_REQUESTS", default_value_t = 1000)]
    max_concurrent_requests: u32,

    #[arg(long, env = "TOLLGATE_REQUEST_TIMEOUT_MS", default_value_t = 60_000)]
    request_timeout_ms: u64,

    #[arg(long, env = "TOLLGATE_UPSTREAM_TIMEOUT_MS", default_value_t = 30_000)]
    upstream_timeout_ms: u64,

    /// Extra engine options as `key=value`, e.g. `component:SharedStateStore=in-memory`.
    #[arg(long = "option", short = 'o', value_parser = parse_option)]
    options: Vec<(String, String)>,

    #[arg(long, env = "TOLLGATE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "TOLLGATE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Seconds to wait for in-flight requests on shutdown.
    #[arg(long, env = "TOLLGATE_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    drain_timeout_secs: u64,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "TOLLGATE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Emit JSON log lines.
    #[arg(long, env = "TOLLGATE_LOG_JSON")]
    log_json: bool,
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

impl Args {
    fn engine_options(&self) -> Vec<(String, String)> {
        let mut options = vec![
            ("node_id".to_string(), self.node_id.clone()),
            ("listen_port".to_string(), self.port.to_string()),
            ("admin_prefix".to_string(), self.admin_prefix.clone()),
            ("management_api".to_string(), (!self.no_management_api).to_string()),
            (
                "max_concurrent_requests".to_string(),
                self.max_concurrent_requests.to_string(),
            ),
            ("request_timeout_ms".to_string(), self.request_timeout_ms.to_string()),
            ("upstream_timeout_ms".to_string(), self.upstream_timeout_ms.to_string()),
        ];
        options.extend(self.options.iter().cloned());
        options
    }

    fn network(&self) -> NetworkConfig {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls,
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "prometheus exporter listening");
    }

    let config = GatewayConfig::from_options(args.engine_options())?;
    let gateway = Arc::new(GatewayBuilder::new(config).build()?);
    let mut maintenance = gateway.spawn_maintenance();

    let mut network = NetworkModule::new(args.network(), Arc::clone(&gateway));
    let port = network.start().await?;
    info!(port, node_id = %gateway.config().node_id, "tollgate ready");
    network.serve(ctrl_c()).await?;

    sweep_now(&maintenance).await;
    maintenance.stop().await;
    info!("tollgate stopped");
    Ok(())
}
