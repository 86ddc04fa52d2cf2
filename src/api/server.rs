//! Control API server

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::api::handlers;
use crate::config::ApiConfig;
use crate::controller::TallyController;
use crate::device::DeviceFactory;
use crate::discovery::Pinger;
use crate::error::Result;

/// Build the API router over a shared controller
pub fn router<F: DeviceFactory, P: Pinger>(controller: Arc<TallyController<F, P>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(handlers::get_status::<F, P>))
        .route("/api/scan", post(handlers::start_scan::<F, P>))
        .route("/api/address", post(handlers::set_address::<F, P>))
        .route("/api/restart_reader", post(handlers::restart_reader::<F, P>))
        .route("/api/active", post(handlers::set_active::<F, P>))
        .layer(cors)
        .with_state(controller)
}

pub struct ApiServer<F: DeviceFactory, P: Pinger> {
    config: ApiConfig,
    controller: Arc<TallyController<F, P>>,
}

impl<F: DeviceFactory, P: Pinger> ApiServer<F, P> {
    pub fn new(config: ApiConfig, controller: Arc<TallyController<F, P>>) -> Self {
        Self { config, controller }
    }

    /// Serve until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.http_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Control API listening on http://{}", addr);

        axum::serve(listener, router(self.controller))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        tracing::info!("Control API stopped");
        Ok(())
    }

    /// Spawn the server; bind failures are logged, not fatal
    pub fn start_background(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(cancel).await {
                tracing::error!("Control API failed: {}", e);
            }
        })
    }
}
