//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::controller::{TallyController, TallySnapshot};
use crate::device::DeviceFactory;
use crate::discovery::Pinger;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type Controller<F, P> = State<Arc<TallyController<F, P>>>;

/// Get the system snapshot
pub async fn get_status<F: DeviceFactory, P: Pinger>(
    State(controller): Controller<F, P>,
) -> Json<ApiResponse<TallySnapshot>> {
    Json(ApiResponse::ok(controller.snapshot()))
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub force: bool,
}

/// Start a discovery scan in the background
pub async fn start_scan<F: DeviceFactory, P: Pinger>(
    State(controller): Controller<F, P>,
    Json(req): Json<ScanRequest>,
) -> (StatusCode, Json<ApiResponse<&'static str>>) {
    if controller.is_scanning() {
        return (
            StatusCode::CONFLICT,
            Json(ApiResponse::error("scan already in progress")),
        );
    }

    tokio::spawn(async move {
        match controller.trigger_scan(req.force).await {
            Ok(outcome) => tracing::info!("Requested scan finished: {:?}", outcome),
            Err(e) => tracing::warn!("Requested scan failed: {}", e),
        }
    });

    (StatusCode::ACCEPTED, Json(ApiResponse::ok("scan started")))
}

#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    pub address: String,
}

/// Override the mixer address
pub async fn set_address<F: DeviceFactory, P: Pinger>(
    State(controller): Controller<F, P>,
    Json(req): Json<AddressRequest>,
) -> (StatusCode, Json<ApiResponse<Ipv4Addr>>) {
    let address: Ipv4Addr = match req.address.trim().parse() {
        Ok(address) => address,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(format!("invalid address: {}", req.address))),
            )
        }
    };

    match controller.set_mixer_address(address).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(address))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Restart the mixer reader
pub async fn restart_reader<F: DeviceFactory, P: Pinger>(
    State(controller): Controller<F, P>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    controller.restart_reader().await;
    (StatusCode::OK, Json(ApiResponse::ok(())))
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub active: bool,
}

/// Enable or blank the tally output
pub async fn set_active<F: DeviceFactory, P: Pinger>(
    State(controller): Controller<F, P>,
    Json(req): Json<ActiveRequest>,
) -> (StatusCode, Json<ApiResponse<bool>>) {
    controller.set_active(req.active);
    (StatusCode::OK, Json(ApiResponse::ok(req.active)))
}
