//! REST API Handlers
//!
//! Health probes, Prometheus exposition and a read-only listing of the
//! registered controllers.

use crate::engine::ControllerInfo;
use crate::metrics::EngineMetrics;
use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

// =============================================================================
// Response Types
// =============================================================================

/// Controller listing response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllersResponse {
    pub controllers: Vec<ControllerInfo>,
}

/// API error response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    metrics: Arc<EngineMetrics>,
    controllers: Vec<ControllerInfo>,
    ready: Arc<AtomicBool>,
}

impl RestRouter {
    /// `ready` flips `/readyz` to 200 once the controllers are running
    pub fn new(metrics: Arc<EngineMetrics>, controllers: Vec<ControllerInfo>, ready: Arc<AtomicBool>) -> Self {
        Self {
            metrics,
            controllers,
            ready,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            metrics: self.metrics,
            controllers: Arc::new(self.controllers),
            ready: self.ready,
        };

        Router::new()
            .route("/healthz", get(health_check))
            .route("/readyz", get(readiness_check))
            .route("/metrics", get(metrics))
            .route("/api/v1/controllers", get(list_controllers))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    metrics: Arc<EngineMetrics>,
    controllers: Arc<Vec<ControllerInfo>>,
    ready: Arc<AtomicBool>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Liveness check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Acquire) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "controllers not started")
    }
}

/// Prometheus text exposition
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiErrorResponse {
                    error: "metrics_unavailable".into(),
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// List registered controllers
async fn list_controllers(State(state): State<AppState>) -> impl IntoResponse {
    Json(ControllersResponse {
        controllers: state.controllers.as_ref().clone(),
    })
}
