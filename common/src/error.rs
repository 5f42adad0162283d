use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

use crate::topics::index::BuildError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Topic not found: {0}")]
    NotFound(String),
    #[error("Topic not ready: {0}")]
    NotReady(String),
    #[error("Index build error: {0}")]
    Build(#[from] BuildError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
