//! Driver host - runs switch and curtain driver sessions behind an HTTP API

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use driver_core::{CapabilityValue, CurtainConfig, DeviceError, Settings, SwitchConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod host;
mod persistence;
mod registry;
mod websocket;

use registry::{CreateDeviceRequest, DeviceRegistry, FrameRequest, RegistryError, ReportRequest};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
}

/// API response wrapper using serde_json::Value for flexibility
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl RegistryError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unsupported { .. } | Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::Device(
                DeviceError::InvalidEndpoint(_)
                | DeviceError::UnknownCapability(_)
                | DeviceError::InvalidValue { .. }
                | DeviceError::InvalidArgs(_)
                | DeviceError::UnknownCard(_),
            ) => StatusCode::BAD_REQUEST,
            Self::Device(DeviceError::Cluster(_)) => StatusCode::BAD_GATEWAY,
            Self::Device(_) | Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn respond<T: Serialize>(result: Result<T, RegistryError>) -> (StatusCode, Json<ApiResponse>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            tracing::debug!("Request failed: {}", e);
            (e.status(), Json(ApiResponse::error(e.to_string())))
        }
    }
}

#[derive(Deserialize)]
struct CapabilityRequest {
    value: CapabilityValue,
}

#[derive(Deserialize)]
struct CardRequest {
    #[serde(default)]
    args: serde_json::Value,
}

/// List all devices
async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.registry.list()))
}

/// Pair a device
async fn create_device(
    State(state): State<AppState>,
    Json(req): Json<CreateDeviceRequest>,
) -> impl IntoResponse {
    respond(state.registry.create(req).await)
}

/// Get a specific device
async fn get_device(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(
        state
            .registry
            .get(&id)
            .ok_or(RegistryError::NotFound(id)),
    )
}

/// Remove a device
async fn delete_device(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(
        state
            .registry
            .remove(&id)
            .await
            .map(|()| serde_json::json!({ "deleted": id })),
    )
}

/// Inject a raw frame
async fn inject_frame(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FrameRequest>,
) -> impl IntoResponse {
    respond(
        state
            .registry
            .handle_frame(&id, &req)
            .map(|actions| serde_json::json!({ "actions": actions })),
    )
}

/// Inject an attribute report
async fn inject_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReportRequest>,
) -> impl IntoResponse {
    respond(
        state
            .registry
            .handle_report(&id, &req)
            .await
            .map(|value| serde_json::json!({ "updated": value })),
    )
}

/// Set a capability value
async fn set_capability(
    State(state): State<AppState>,
    Path((id, capability)): Path<(String, String)>,
    Json(req): Json<CapabilityRequest>,
) -> impl IntoResponse {
    respond(
        state
            .registry
            .set_capability(&id, &capability, req.value.clone())
            .await
            .map(|()| serde_json::json!({ "capability": capability, "value": req.value })),
    )
}

/// Change device settings
async fn update_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(changes): Json<Settings>,
) -> impl IntoResponse {
    respond(state.registry.update_settings(&id, changes).await)
}

/// Run an action card
async fn run_action(
    State(state): State<AppState>,
    Path((id, card)): Path<(String, String)>,
    Json(req): Json<CardRequest>,
) -> impl IntoResponse {
    respond(
        state
            .registry
            .run_action(&id, &card, &req.args)
            .await
            .map(|()| serde_json::json!({ "action": card })),
    )
}

/// Evaluate a condition card
async fn run_condition(
    State(state): State<AppState>,
    Path((id, card)): Path<(String, String)>,
    Json(req): Json<CardRequest>,
) -> impl IntoResponse {
    respond(
        state
            .registry
            .run_condition(&id, &card, &req.args)
            .await
            .map(|result| serde_json::json!({ "condition": card, "result": result })),
    )
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, state))
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/devices", get(list_devices).post(create_device))
        .route("/api/v1/devices/:id", get(get_device).delete(delete_device))
        .route("/api/v1/devices/:id/frames", post(inject_frame))
        .route("/api/v1/devices/:id/reports", post(inject_report))
        .route(
            "/api/v1/devices/:id/capabilities/:capability",
            put(set_capability),
        )
        .route("/api/v1/devices/:id/settings", put(update_settings))
        .route("/api/v1/devices/:id/actions/:card", post(run_action))
        .route("/api/v1/devices/:id/conditions/:card", post(run_condition))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "driver_host=debug,driver_core=debug,zcl_frames=debug,info".into()
            }),
        )
        .init();

    tracing::info!("Starting driver host");

    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    let switch_config = SwitchConfig::from_env();
    let curtain_config = CurtainConfig::from_env();
    tracing::info!("Switch config: {:?}", switch_config);
    tracing::info!("Curtain config: {:?}", curtain_config);

    let registry = Arc::new(
        DeviceRegistry::new(
            std::path::Path::new(&data_dir),
            switch_config,
            curtain_config,
        )
        .await,
    );
    tracing::info!("Restored {} devices from {}", registry.list().len(), data_dir);

    let state = AppState {
        registry: registry.clone(),
    };

    let addr: std::net::SocketAddr = std::env::var("DRIVER_HOST_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    registry.shutdown();
    tracing::info!("Driver host stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            RegistryError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RegistryError::Device(DeviceError::InvalidEndpoint(9)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RegistryError::Device(DeviceError::Cluster(driver_core::ClusterError::Timeout))
                .status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_response_shape() {
        let (status, Json(body)) = respond::<()>(Err(RegistryError::InvalidPayload("odd".into())));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Invalid payload: odd");
    }
}
