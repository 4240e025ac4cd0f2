//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the listener and
//! `serve()` accepts connections until shutdown. Splitting bind from serve
//! lets the caller learn the bound port (and finish wiring) first.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, put};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::handlers::{
    delete_application, delete_service, health_handler, liveness_handler, proxy_handler,
    put_application, put_service, readiness_handler, system_status, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::engine::Gateway;

pub struct NetworkModule {
    config: NetworkConfig,
    gateway: Arc<Gateway>,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig, gateway: Arc<Gateway>) -> Self {
        Self {
            config,
            gateway,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the router.
    ///
    /// Under the admin prefix:
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `PUT /services`, `DELETE /services/{org}/{service}` (management API)
    /// - `PUT /applications`, `DELETE /applications/{org}/{app}` (management API)
    /// - `GET /system/status` (management API)
    ///
    /// Everything else is proxied.
    #[must_use]
    pub fn build_router(&self) -> Router {
        let state = AppState::new(Arc::clone(&self.gateway), Arc::clone(&self.shutdown));
        let config = self.gateway.config();

        let mut admin = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler));
        if config.management_api {
            admin = admin
                .route("/services", put(put_service))
                .route("/services/{org}/{service}", delete(delete_service))
                .route("/applications", put(put_application))
                .route("/applications/{org}/{app}", delete(delete_application))
                .route("/system/status", get(system_status));
        }

        Router::new()
            .nest(&config.admin_prefix, admin)
            .fallback(proxy_handler)
            .layer(build_http_layers())
            .with_state(state)
    }

    /// Binds the listener and returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "gateway listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error on a fatal I/O error or unreadable TLS material.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .expect("start() must be called before serve()");
        let controller = self.shutdown;
        let config = self.config;

        controller.set_ready();

        // Flip to Draining as soon as the signal fires so readiness fails
        // and new proxied requests are refused while connections wind down.
        let draining = Arc::clone(&controller);
        let shutdown = async move {
            shutdown.await;
            draining.trigger_shutdown();
        };

        match &config.tls {
            Some(tls) => serve_tls(listener, router, tls, shutdown).await?,
            None => serve_plain(listener, router, shutdown).await?,
        }

        drain(&controller, &config).await;
        Ok(())
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Reuses the pre-bound listener through `axum-server` with rustls.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!(%addr, "serving TLS");

    axum_server::from_tcp_rustls(std_listener, rustls)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}

async fn drain(controller: &ShutdownController, config: &NetworkConfig) {
    controller.trigger_shutdown();
    if controller.wait_for_drain(config.drain_timeout).await {
        info!("all in-flight requests drained");
    } else {
        warn!(
            remaining = controller.in_flight_count(),
            "drain timeout expired with requests still in flight"
        );
    }
}
