use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_openai::{
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        ChatCompletionTool, CreateChatCompletionRequestArgs,
    },
    Client,
};
use serde_json::Value;

use crate::{
    error::AppError,
    topics::index::ScoredChunk,
    utils::config::{AnswerBackendKind, AppConfig},
};

/// Stable answer for a topic whose document set holds nothing useful yet.
pub const NO_INFORMATION_ANSWER: &str =
    "I don't have any information about that yet. Upload some documents first.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You answer questions using only the provided context \
     information. If the context does not contain the answer, say that you do not have enough \
     information. Be concise.";

/// One turn of a chat-completion exchange, as seen by the agent loop.
#[derive(Debug, Default)]
pub struct ChatTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ChatCompletionMessageToolCall>,
}

#[derive(Clone)]
pub struct AnswerProvider {
    inner: AnswerInner,
}

#[derive(Clone)]
enum AnswerInner {
    OpenAI {
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        query_model: String,
        agent_model: String,
    },
    Extractive,
}

impl AnswerProvider {
    pub fn from_config(
        config: &AppConfig,
        client: Option<Arc<Client<async_openai::config::OpenAIConfig>>>,
    ) -> Result<Self> {
        match config.answer_backend {
            AnswerBackendKind::Openai => {
                let client = client
                    .ok_or_else(|| anyhow!("OpenAI answer backend requires an OpenAI client"))?;
                Ok(Self::new_openai(
                    client,
                    config.query_model.clone(),
                    config.agent_model.clone(),
                ))
            }
            AnswerBackendKind::Extractive => Ok(Self::new_extractive()),
        }
    }

    pub fn new_openai(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        query_model: String,
        agent_model: String,
    ) -> Self {
        AnswerProvider {
            inner: AnswerInner::OpenAI {
                client,
                query_model,
                agent_model,
            },
        }
    }

    pub fn new_extractive() -> Self {
        AnswerProvider {
            inner: AnswerInner::Extractive,
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            AnswerInner::OpenAI { .. } => "openai",
            AnswerInner::Extractive => "extractive",
        }
    }

    pub fn is_extractive(&self) -> bool {
        matches!(self.inner, AnswerInner::Extractive)
    }

    /// Synthesizes an answer to `question` from retrieved supporting chunks.
    ///
    /// An empty context yields the stable no-information answer instead of an
    /// error; an empty topic is a valid state right after its first upload.
    pub async fn answer(&self, question: &str, chunks: &[ScoredChunk]) -> Result<String, AppError> {
        if chunks.is_empty() {
            return Ok(NO_INFORMATION_ANSWER.to_string());
        }

        match &self.inner {
            AnswerInner::Extractive => {
                // Top chunk verbatim keeps tests and offline use deterministic.
                let top = chunks
                    .first()
                    .ok_or_else(|| AppError::LLMParsing("empty context after guard".into()))?;
                Ok(top.text.clone())
            }
            AnswerInner::OpenAI {
                client,
                query_model,
                ..
            } => {
                let user_message = create_user_message(&chunks_to_context(chunks), question);
                let request = CreateChatCompletionRequestArgs::default()
                    .model(query_model)
                    .messages([
                        ChatCompletionRequestSystemMessage::from(SYNTHESIS_SYSTEM_PROMPT).into(),
                        ChatCompletionRequestUserMessage::from(user_message).into(),
                    ])
                    .build()?;

                let response = client.chat().create(request).await?;
                response
                    .choices
                    .first()
                    .and_then(|choice| choice.message.content.clone())
                    .ok_or_else(|| {
                        AppError::LLMParsing("No content found in LLM response".into())
                    })
            }
        }
    }

    /// Runs one chat-completion turn for the agent loop.
    ///
    /// Only meaningful for the OpenAI backend; the extractive backend answers
    /// agent queries without a model round-trip.
    pub async fn chat_turn(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<ChatTurn, AppError> {
        match &self.inner {
            AnswerInner::Extractive => Err(AppError::Validation(
                "extractive answer backend has no chat model".into(),
            )),
            AnswerInner::OpenAI {
                client,
                agent_model,
                ..
            } => {
                let mut builder = CreateChatCompletionRequestArgs::default();
                builder.model(agent_model).messages(messages);
                if !tools.is_empty() {
                    builder.tools(tools);
                }
                let request = builder.build()?;

                let response = client.chat().create(request).await?;
                let message = response
                    .choices
                    .first()
                    .map(|choice| choice.message.clone())
                    .ok_or_else(|| {
                        AppError::LLMParsing("No choices found in LLM response".into())
                    })?;

                Ok(ChatTurn {
                    content: message.content,
                    tool_calls: message.tool_calls.unwrap_or_default(),
                })
            }
        }
    }
}

fn chunks_to_context(chunks: &[ScoredChunk]) -> Value {
    fn round_score(value: f32) -> f64 {
        (f64::from(value) * 1000.0).round() / 1000.0
    }

    serde_json::json!(chunks
        .iter()
        .map(|chunk| {
            serde_json::json!({
                "source": chunk.source,
                "content": chunk.text,
                "score": round_score(chunk.score),
            })
        })
        .collect::<Vec<_>>())
}

fn create_user_message(context_json: &Value, query: &str) -> String {
    format!(
        r"
        Context Information:
        ==================
        {context_json}

        User Question:
        ==================
        {query}
        "
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            text: text.to_string(),
            source: "doc.txt".to_string(),
            score,
        }
    }

    #[tokio::test]
    async fn test_extractive_answer_returns_top_chunk() {
        let provider = AnswerProvider::new_extractive();
        let chunks = vec![chunk("The sky is blue.", 0.9), chunk("Grass is green.", 0.4)];
        let answer = provider.answer("What color is the sky?", &chunks).await.expect("answer");
        assert_eq!(answer, "The sky is blue.");
    }

    #[tokio::test]
    async fn test_empty_context_yields_no_information_answer() {
        let provider = AnswerProvider::new_extractive();
        let answer = provider.answer("anything", &[]).await.expect("answer");
        assert_eq!(answer, NO_INFORMATION_ANSWER);
    }

    #[tokio::test]
    async fn test_chat_turn_rejected_for_extractive_backend() {
        let provider = AnswerProvider::new_extractive();
        let result = provider.chat_turn(Vec::new(), Vec::new()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_context_json_carries_sources_and_scores() {
        let context = chunks_to_context(&[chunk("Tokio is a runtime.", 0.512)]);
        let rendered = context.to_string();
        assert!(rendered.contains("doc.txt"));
        assert!(rendered.contains("Tokio is a runtime."));
        assert!(rendered.contains("0.512"));
    }
}
