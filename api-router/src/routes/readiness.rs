use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: returns 200 if the document root is readable, else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    match tokio::fs::read_dir(state.registry.root()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "data_dir": "ok" }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "data_dir": "fail" },
                "reason": e.to_string()
            })),
        ),
    }
}
