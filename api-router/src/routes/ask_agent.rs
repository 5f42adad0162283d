use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AgentParams {
    pub data: String,
}

/// Conversational entry point: the agent decides whether to consult the
/// uploaded documents and keeps session context across calls.
pub async fn ask_agent(
    State(state): State<ApiState>,
    Json(input): Json<AgentParams>,
) -> Result<impl IntoResponse, ApiError> {
    let message = input.data.trim();
    if message.is_empty() {
        return Err(ApiError::ValidationError(
            "message must not be empty".to_string(),
        ));
    }

    let reply = state.agent.chat(message).await?;
    Ok((StatusCode::OK, Json(json!({ "data": reply }))))
}
