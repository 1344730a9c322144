use axum::{http::StatusCode, response::IntoResponse, Extension, Json};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Virtual Try-On Service", "status": "running" }))
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "ai-tryon",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Ready once the generation model is loaded.
pub async fn readiness_check(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let model_loaded = state.pipeline.model_ready();
    let (code, status) = if model_loaded {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        code,
        Json(json!({
            "status": status,
            "model_loaded": model_loaded,
            "jobs": state.tracker.counts(),
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
