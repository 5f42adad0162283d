use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use common::error::AppError;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub data: String,
    #[serde(default)]
    pub topic: Option<String>,
}

/// Greeting for clients probing the chat endpoint.
pub async fn chat_banner() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "data": "Lets chat" })))
}

/// Answers a question, either against a named topic or routed to the
/// best-matching one. A topic mid-first-build is reported as not ready
/// rather than blocking the request on the build.
pub async fn query_data(
    State(state): State<ApiState>,
    Json(input): Json<QueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let question = input.data.trim();
    if question.is_empty() {
        return Err(ApiError::ValidationError(
            "question must not be empty".to_string(),
        ));
    }

    let result = match input.topic.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => state.query.query_topic(name, question).await,
        _ => state.query.query_best(question).await,
    };

    match result {
        Ok(answer) => Ok((
            StatusCode::OK,
            Json(json!({ "data": answer.answer, "topic": answer.topic })),
        )),
        Err(AppError::NotReady(topic)) => {
            info!(topic, "Query against a topic still building its first index");
            Ok((
                StatusCode::OK,
                Json(json!({
                    "data": format!("Topic {topic} is still being indexed, try again shortly"),
                    "status": "not_ready"
                })),
            ))
        }
        Err(err) => Err(err.into()),
    }
}
