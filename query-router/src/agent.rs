use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessage, ChatCompletionTool, ChatCompletionToolArgs,
    ChatCompletionToolType, FunctionObjectArgs,
};
use common::{
    error::AppError,
    utils::{answer::AnswerProvider, embedding::EmbeddingProvider},
};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::router::{query_snapshot, RouterSnapshot};

const AGENT_SYSTEM_PROMPT: &str = "You are a helpful assistant. You have one tool, \
     uploaded_files, which answers questions from documents the user has uploaded. Use it \
     whenever a question could be answered by uploaded material; answer directly otherwise.";

/// Upper bound on tool round-trips per chat turn before a text answer is
/// forced.
const MAX_TOOL_ITERATIONS: usize = 4;

/// Arguments the model passes when invoking the `uploaded_files` tool.
#[derive(Debug, Deserialize)]
struct ToolQuery {
    query: String,
}

/// One immutable agent snapshot: a router snapshot plus the shared session.
///
/// The session history is shared across snapshots so a refresh never drops
/// conversation context; only the tool's view of the topics is replaced.
pub struct Agent {
    snapshot: Arc<RouterSnapshot>,
    session: Arc<Mutex<Vec<ChatCompletionRequestMessage>>>,
    embedding: Arc<EmbeddingProvider>,
    answers: Arc<AnswerProvider>,
}

impl Agent {
    fn tool(&self) -> Result<ChatCompletionTool, AppError> {
        let descriptor = self.snapshot.tool_descriptor();
        let function = FunctionObjectArgs::default()
            .name(descriptor.name)
            .description(descriptor.description)
            .parameters(serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The question to answer from the uploaded documents"
                    }
                },
                "required": ["query"]
            }))
            .build()
            .map_err(AppError::OpenAI)?;

        ChatCompletionToolArgs::default()
            .r#type(ChatCompletionToolType::Function)
            .function(function)
            .build()
            .map_err(AppError::OpenAI)
    }

    /// Appends `message` to the session and produces the agent's reply,
    /// answering tool invocations from the snapshot this call started with.
    pub async fn chat(&self, message: &str) -> Result<String, AppError> {
        let mut session = self.session.lock().await;
        session.push(ChatCompletionRequestUserMessage::from(message).into());

        if self.answers.is_extractive() {
            // Offline backend: the agent consults its tool unconditionally.
            let routed =
                query_snapshot(&self.snapshot, &self.embedding, &self.answers, message).await?;
            session.push(assistant_text(&routed.answer)?);
            return Ok(routed.answer);
        }

        let tool = self.tool()?;
        let mut messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(session.len() + 1);
        messages.push(ChatCompletionRequestSystemMessage::from(AGENT_SYSTEM_PROMPT).into());
        messages.extend(session.iter().cloned());

        for _ in 0..MAX_TOOL_ITERATIONS {
            let turn = self
                .answers
                .chat_turn(messages.clone(), vec![tool.clone()])
                .await?;

            if turn.tool_calls.is_empty() {
                let content = turn.content.ok_or_else(|| {
                    AppError::LLMParsing("No content found in agent response".into())
                })?;
                session.push(assistant_text(&content)?);
                return Ok(content);
            }

            debug!(tool_count = turn.tool_calls.len(), "Executing agent tool calls");
            messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .tool_calls(turn.tool_calls.clone())
                    .build()
                    .map_err(AppError::OpenAI)?
                    .into(),
            );

            for call in &turn.tool_calls {
                let query = serde_json::from_str::<ToolQuery>(&call.function.arguments)
                    .map(|args| args.query)
                    .unwrap_or_else(|_| message.to_string());

                let result =
                    query_snapshot(&self.snapshot, &self.embedding, &self.answers, &query).await;
                let content = match result {
                    Ok(routed) => routed.answer,
                    Err(err) => {
                        warn!(error = %err, "uploaded_files tool invocation failed");
                        format!("The uploaded_files tool failed: {err}")
                    }
                };

                messages.push(
                    ChatCompletionRequestToolMessageArgs::default()
                        .tool_call_id(call.id.clone())
                        .content(content)
                        .build()
                        .map_err(AppError::OpenAI)?
                        .into(),
                );
            }
        }

        info!("Max tool iterations reached, forcing text response");
        let turn = self.answers.chat_turn(messages, Vec::new()).await?;
        let content = turn
            .content
            .ok_or_else(|| AppError::LLMParsing("No content found in agent response".into()))?;
        session.push(assistant_text(&content)?);
        Ok(content)
    }
}

fn assistant_text(content: &str) -> Result<ChatCompletionRequestMessage, AppError> {
    Ok(ChatCompletionRequestAssistantMessageArgs::default()
        .content(content.to_string())
        .build()
        .map_err(AppError::OpenAI)?
        .into())
}

/// Process-wide holder of the current agent snapshot.
///
/// `refresh` swaps the snapshot whole; a `chat` already in flight keeps the
/// agent it resolved at entry, so it never observes a half-replaced tool set.
pub struct AgentHandle {
    current: RwLock<Arc<Agent>>,
}

impl AgentHandle {
    pub fn new(
        snapshot: Arc<RouterSnapshot>,
        embedding: Arc<EmbeddingProvider>,
        answers: Arc<AnswerProvider>,
    ) -> Self {
        let agent = Agent {
            snapshot,
            session: Arc::new(Mutex::new(Vec::new())),
            embedding,
            answers,
        };
        Self {
            current: RwLock::new(Arc::new(agent)),
        }
    }

    /// Replaces the held router snapshot, keeping the conversation session.
    pub async fn refresh(&self, snapshot: Arc<RouterSnapshot>) {
        let mut current = self.current.write().await;
        let next = Agent {
            snapshot,
            session: Arc::clone(&current.session),
            embedding: Arc::clone(&current.embedding),
            answers: Arc::clone(&current.answers),
        };
        *current = Arc::new(next);
    }

    pub async fn chat(&self, message: &str) -> Result<String, AppError> {
        let agent = Arc::clone(&*self.current.read().await);
        agent.chat(message).await
    }

    #[cfg(test)]
    async fn session_len(&self) -> usize {
        let agent = Arc::clone(&*self.current.read().await);
        let session = agent.session.lock().await;
        session.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::NO_KNOWLEDGE_ANSWER;
    use chrono::Utc;
    use common::topics::{
        index::{IndexedChunk, TopicIndex},
        registry::TopicRegistry,
    };
    use tempfile::TempDir;

    fn providers() -> (Arc<EmbeddingProvider>, Arc<AnswerProvider>) {
        (
            Arc::new(EmbeddingProvider::new_hashed(64).expect("embedding")),
            Arc::new(AnswerProvider::new_extractive()),
        )
    }

    async fn snapshot_with_science(embedding: &EmbeddingProvider) -> Arc<RouterSnapshot> {
        let dir = TempDir::new().expect("dir");
        let registry = TopicRegistry::new(dir.path().to_path_buf());
        let science = registry.register("science").expect("register");

        let text = "The sky is blue.";
        let vector = embedding.embed(text).await.expect("embed");
        science
            .install_index(Arc::new(TopicIndex {
                topic: "science".into(),
                chunks: vec![IndexedChunk {
                    text: text.into(),
                    source: "sky.txt".into(),
                    embedding: vector,
                }],
                document_count: 1,
                skipped_documents: Vec::new(),
                built_at: Utc::now(),
            }))
            .await;

        Arc::new(RouterSnapshot::compose(&registry).await)
    }

    #[tokio::test]
    async fn test_chat_answers_from_snapshot() {
        let (embedding, answers) = providers();
        let snapshot = snapshot_with_science(&embedding).await;
        let handle = AgentHandle::new(snapshot, embedding, answers);

        let reply = handle.chat("What color is the sky?").await.expect("chat");
        assert!(reply.contains("blue"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_session_and_swaps_tool() {
        let (embedding, answers) = providers();
        let handle = AgentHandle::new(
            Arc::new(RouterSnapshot::empty()),
            Arc::clone(&embedding),
            answers,
        );

        let before = handle.chat("What color is the sky?").await.expect("chat");
        assert_eq!(before, NO_KNOWLEDGE_ANSWER);
        assert_eq!(handle.session_len().await, 2);

        handle.refresh(snapshot_with_science(&embedding).await).await;

        let after = handle.chat("What color is the sky?").await.expect("chat");
        assert!(after.contains("blue"));
        // The refreshed agent appended to the same session.
        assert_eq!(handle.session_len().await, 4);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_does_not_disturb_chat() {
        let (embedding, answers) = providers();
        let handle = Arc::new(AgentHandle::new(
            Arc::new(RouterSnapshot::empty()),
            Arc::clone(&embedding),
            answers,
        ));

        let chatting = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.chat("hello there").await })
        };
        handle.refresh(snapshot_with_science(&embedding).await).await;

        let reply = chatting.await.expect("join").expect("chat");
        // Whichever snapshot the chat captured, it produced a whole answer.
        assert!(!reply.is_empty());
    }
}
