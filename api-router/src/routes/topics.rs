use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Registered topic names in registration order, the default topic first.
pub async fn get_topics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "topics": state.registry.list() })),
    )
}
