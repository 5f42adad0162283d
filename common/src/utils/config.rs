use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    Openai,
    Hashed,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnswerBackendKind {
    Openai,
    Extractive,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub http_port: u16,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackendKind,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_answer_backend")]
    pub answer_backend: AnswerBackendKind,
    #[serde(default = "default_query_model")]
    pub query_model: String,
    #[serde(default = "default_agent_model")]
    pub agent_model: String,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_upload_max_body_bytes")]
    pub upload_max_body_bytes: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_embedding_backend() -> EmbeddingBackendKind {
    EmbeddingBackendKind::Openai
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_answer_backend() -> AnswerBackendKind {
    AnswerBackendKind::Openai
}

fn default_query_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_agent_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_build_timeout_secs() -> u64 {
    300
}

fn default_upload_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            data_dir: default_data_dir(),
            http_port: 3000,
            embedding_backend: default_embedding_backend(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            answer_backend: default_answer_backend(),
            query_model: default_query_model(),
            agent_model: default_agent_model(),
            build_timeout_secs: default_build_timeout_secs(),
            upload_max_body_bytes: default_upload_max_body_bytes(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_fields() {
        let config = AppConfig::default();
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.embedding_backend, EmbeddingBackendKind::Openai);
        assert_eq!(config.build_timeout_secs, 300);
    }

    #[test]
    fn test_backend_kinds_deserialize_lowercase() {
        let embedding: EmbeddingBackendKind = serde_json::from_str("\"hashed\"").expect("kind");
        assert_eq!(embedding, EmbeddingBackendKind::Hashed);
        let answer: AnswerBackendKind = serde_json::from_str("\"extractive\"").expect("kind");
        assert_eq!(answer, AnswerBackendKind::Extractive);
    }
}
