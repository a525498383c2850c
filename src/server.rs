//! HTTP surface (axum)
//!
//! - `POST /api/v1/generate`: render and deliver
//! - `POST /api/v1/generate/preview`: render and return inline, storage untouched
//! - `GET /api/v1/health`: renderer and storage status
//! - `GET /`: service info

use crate::delivery::{DeliveryMode, DeliveryOrchestrator, DeliveryResult};
use crate::pool::EngineStatus;
use crate::{Error, RenderDefaults, RenderRequest};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared handler state
pub struct AppState {
    pub delivery: DeliveryOrchestrator,
    /// Applied to fields the request leaves out
    pub defaults: RenderDefaults,
}

impl AppState {
    pub fn new(delivery: DeliveryOrchestrator, defaults: RenderDefaults) -> Self {
        Self { delivery, defaults }
    }
}

/// Body of the generate endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratePayload {
    pub html: String,
    #[serde(default)]
    pub css: Option<String>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub full_page: bool,
    #[serde(default)]
    pub transparent: bool,
    #[serde(default)]
    pub response_format: DeliveryMode,
}

impl GeneratePayload {
    /// Resolve missing fields against `defaults`.
    pub fn into_request(self, defaults: &RenderDefaults) -> RenderRequest {
        RenderRequest {
            html: self.html,
            css: self.css,
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            scale: self.scale.unwrap_or(defaults.scale),
            full_page: self.full_page,
            transparent: self.transparent,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    success: bool,
    #[serde(flatten)]
    result: DeliveryResult,
}

impl From<DeliveryResult> for GenerateResponse {
    fn from(result: DeliveryResult) -> Self {
        Self {
            success: result.is_complete(),
            result,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::ValidationFailure(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Error::RenderTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            Error::RenderEngineFailure(_) => {
                error!("{}", self);
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            Error::NotConfigured(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Error::StorageUploadFailure { .. } | Error::StorageDeleteFailure { .. } => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            Error::Config(_) | Error::Internal(_) => {
                error!("Internal error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };

        let body = Json(json!({
            "success": false,
            "errorCode": self.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

fn parse_payload(payload: Result<Json<GeneratePayload>, JsonRejection>) -> Result<GeneratePayload, Error> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::ValidationFailure(rejection.body_text()))
}

/// Render and deliver in the requested format
pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GeneratePayload>, JsonRejection>,
) -> Result<Json<impl Serialize>, Error> {
    let payload = parse_payload(payload)?;
    let mode = payload.response_format;
    let request = payload.into_request(&state.defaults);
    let result = state.delivery.deliver(&request, mode).await?;
    Ok(Json(GenerateResponse::from(result)))
}

/// Render and return inline data only
pub async fn preview(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GeneratePayload>, JsonRejection>,
) -> Result<Json<impl Serialize>, Error> {
    let request = parse_payload(payload)?.into_request(&state.defaults);
    let result = state.delivery.preview(&request).await?;
    Ok(Json(GenerateResponse::from(result)))
}

/// Renderer and storage status
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let renderer = match state.delivery.capture_engine().pool().status().await {
        EngineStatus::Ready => "ok",
        EngineStatus::Idle => "idle",
        EngineStatus::Unavailable => "error",
    };

    let store = state.delivery.store();
    let s3 = if !store.is_configured() {
        "not_configured"
    } else if store.check_connectivity().await {
        "ok"
    } else {
        "error"
    };

    let status = if renderer == "error" || s3 == "error" {
        "degraded"
    } else {
        "healthy"
    };

    Json(json!({
        "status": status,
        "version": VERSION,
        "services": {
            "renderer": renderer,
            "s3": s3,
        },
    }))
}

/// Service info
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "rfrender",
        "version": VERSION,
        "endpoints": {
            "generate": "/api/v1/generate",
            "preview": "/api/v1/generate/preview",
            "health": "/api/v1/health",
        },
    }))
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/api/v1/health", get(health))
        .route("/api/v1/generate", post(generate))
        .route("/api/v1/generate/preview", post(preview))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves, then stop accepting and drain.
pub async fn serve<F>(listener: tokio::net::TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
