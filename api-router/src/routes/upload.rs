use std::path::Path;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::{error::AppError, topics::registry::DEFAULT_TOPIC};
use mime_guess::from_path;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    pub topic: Option<String>,
    #[form_data(limit = "50000000")]
    #[form_data(default)]
    pub file: Vec<FieldData<NamedTempFile>>,
}

/// Accepts one or more documents for a topic and returns as soon as the
/// rebuild is scheduled. The topic directory doubles as the persistence
/// layer: whatever lands there is what the next build indexes.
pub async fn upload_documents(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    if input.file.is_empty() {
        return Err(ApiError::ValidationError(
            "upload requires at least one file part".to_string(),
        ));
    }

    let topic_name = input
        .topic
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_TOPIC);

    let topic = state.registry.register(topic_name)?;
    info!(
        topic = %topic.name,
        file_count = input.file.len(),
        "Received document upload"
    );

    for file in input.file {
        persist_upload(file, &topic.documents_dir).await?;
    }

    state.coordinator.schedule(topic).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Upload complete. LLM ready to take questions" })),
    ))
}

/// Moves the spooled upload into the topic directory under a fresh
/// collision-free name, keeping the original extension for type detection.
async fn persist_upload(
    field: FieldData<NamedTempFile>,
    documents_dir: &Path,
) -> Result<(), AppError> {
    let original = field
        .metadata
        .file_name
        .unwrap_or_else(|| "upload".to_string());

    let stored_name = match file_extension(&original) {
        Some(ext) => format!("file-{}.{ext}", Uuid::new_v4()),
        None => format!("file-{}", Uuid::new_v4()),
    };
    let final_path = documents_dir.join(stored_name);
    let mime_type = from_path(&original).first_or_octet_stream();
    debug!(
        original = %original,
        mime_type = %mime_type,
        path = %final_path.display(),
        "Persisting uploaded document"
    );

    if let Err(err) = field.contents.persist(&final_path) {
        // The spool directory may sit on a different filesystem; persist is
        // a rename and cannot cross it, so fall back to a copy.
        tokio::fs::copy(err.file.path(), &final_path).await?;
    }
    Ok(())
}

/// Sanitized lowercase extension of an uploaded file name, if it has one.
fn file_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    let cleaned: String = ext
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    (!cleaned.is_empty()).then_some(cleaned)
}
