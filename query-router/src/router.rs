use std::sync::Arc;

use common::{
    error::AppError,
    topics::{
        index::TopicIndex,
        registry::TopicRegistry,
    },
    utils::{answer::AnswerProvider, embedding::EmbeddingProvider},
};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Name under which the router is exposed to the conversational agent.
pub const TOOL_NAME: &str = "uploaded_files";

/// Stable answer when no topic has a ready index yet.
pub const NO_KNOWLEDGE_ANSWER: &str =
    "No documents have been uploaded and indexed yet, so there is nothing to answer from.";

/// Supporting chunks fed into answer synthesis per query.
const SEARCH_LIMIT: usize = 5;

/// A topic with a completed build, as captured in a router snapshot.
#[derive(Clone)]
pub struct ReadyTopic {
    pub name: String,
    pub generation: u64,
    pub index: Arc<TopicIndex>,
}

/// Named, described capability descriptor consumed by the agent. Regenerated
/// on every recomposition so the agent's reasoning sees the current topic set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

/// Read-only composition of every ready topic at one instant.
///
/// Rebuilt, never mutated: a query that started against one snapshot keeps it
/// until done, so per-topic swaps can never tear a cross-topic routing
/// decision. The snapshot may lag one rebuild cycle behind the topics; that
/// is staleness, not inconsistency.
#[derive(Clone, Default)]
pub struct RouterSnapshot {
    topics: Vec<ReadyTopic>,
}

impl RouterSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Composes a snapshot from the registry's currently installed indexes.
    pub async fn compose(registry: &TopicRegistry) -> Self {
        let mut topics = Vec::new();
        for topic in registry.topics() {
            if let Some(installed) = topic.current_index().await {
                topics.push(ReadyTopic {
                    name: topic.name.clone(),
                    generation: installed.generation,
                    index: installed.index,
                });
            }
        }
        Self { topics }
    }

    pub fn topics(&self) -> &[ReadyTopic] {
        &self.topics
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn tool_descriptor(&self) -> ToolDescriptor {
        let description = if self.topics.is_empty() {
            "A tool that can answer questions based on what is uploaded. \
             Nothing has been uploaded yet."
                .to_string()
        } else {
            let names: Vec<&str> = self.topics.iter().map(|t| t.name.as_str()).collect();
            format!(
                "A tool that can answer questions based on what is uploaded. \
                 Currently indexed topics: {}.",
                names.join(", ")
            )
        };
        ToolDescriptor {
            name: TOOL_NAME.to_string(),
            description,
        }
    }

    /// The ready topic whose best chunk matches the query embedding closest.
    fn best_topic(&self, query_embedding: &[f32]) -> Option<&ReadyTopic> {
        self.topics
            .iter()
            .filter_map(|topic| {
                topic
                    .index
                    .best_score(query_embedding)
                    .map(|score| (topic, score))
            })
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(topic, _)| topic)
    }
}

/// Answer to a routed query, with the topic it was answered from when one
/// was selected.
#[derive(Debug, Clone)]
pub struct TopicAnswer {
    pub topic: Option<String>,
    pub answer: String,
}

/// Answers a question against one snapshot: embed once, route to the
/// best-matching ready topic, synthesize from its top chunks.
pub async fn query_snapshot(
    snapshot: &RouterSnapshot,
    embedding: &EmbeddingProvider,
    answers: &AnswerProvider,
    question: &str,
) -> Result<TopicAnswer, AppError> {
    if snapshot.is_empty() {
        return Ok(TopicAnswer {
            topic: None,
            answer: NO_KNOWLEDGE_ANSWER.to_string(),
        });
    }

    let query_embedding = embedding.embed(question).await?;
    let Some(best) = snapshot.best_topic(&query_embedding) else {
        // Every ready index is empty; answer from the first one so the
        // no-information policy applies.
        let answer = answers.answer(question, &[]).await?;
        return Ok(TopicAnswer {
            topic: None,
            answer,
        });
    };

    debug!(topic = %best.name, "Routed query to best-matching topic");
    let chunks = best.index.search(&query_embedding, SEARCH_LIMIT);
    let answer = answers.answer(question, &chunks).await?;
    Ok(TopicAnswer {
        topic: Some(best.name.clone()),
        answer,
    })
}

/// Holder of the current router snapshot, swapped whole on recomposition.
pub struct RouterHandle {
    current: RwLock<Arc<RouterSnapshot>>,
}

impl RouterHandle {
    pub fn new(snapshot: RouterSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub async fn load(&self) -> Arc<RouterSnapshot> {
        Arc::clone(&*self.current.read().await)
    }

    /// Recomposes the snapshot from the registry and installs it.
    pub async fn recompose(&self, registry: &TopicRegistry) -> Arc<RouterSnapshot> {
        let snapshot = Arc::new(RouterSnapshot::compose(registry).await);
        let mut current = self.current.write().await;
        *current = Arc::clone(&snapshot);
        snapshot
    }
}

/// Facade over direct topic queries and best-topic routing.
pub struct QueryRouter {
    registry: Arc<TopicRegistry>,
    handle: Arc<RouterHandle>,
    embedding: Arc<EmbeddingProvider>,
    answers: Arc<AnswerProvider>,
}

impl QueryRouter {
    pub fn new(
        registry: Arc<TopicRegistry>,
        handle: Arc<RouterHandle>,
        embedding: Arc<EmbeddingProvider>,
        answers: Arc<AnswerProvider>,
    ) -> Self {
        Self {
            registry,
            handle,
            embedding,
            answers,
        }
    }

    /// Direct query against one named topic's current index.
    ///
    /// Bounded latency: never waits on an in-flight rebuild. A topic that has
    /// never completed a build yields `NotReady`.
    #[instrument(skip(self, question))]
    pub async fn query_topic(&self, name: &str, question: &str) -> Result<TopicAnswer, AppError> {
        let topic = self
            .registry
            .get(name)
            .ok_or_else(|| AppError::NotFound(name.to_string()))?;

        let installed = topic
            .current_index()
            .await
            .ok_or_else(|| AppError::NotReady(name.to_string()))?;

        let query_embedding = self.embedding.embed(question).await?;
        let chunks = installed.index.search(&query_embedding, SEARCH_LIMIT);
        let answer = self.answers.answer(question, &chunks).await?;
        Ok(TopicAnswer {
            topic: Some(topic.name.clone()),
            answer,
        })
    }

    /// Routed query across whichever topics are ready in the current snapshot.
    pub async fn query_best(&self, question: &str) -> Result<TopicAnswer, AppError> {
        let snapshot = self.handle.load().await;
        query_snapshot(&snapshot, &self.embedding, &self.answers, question).await
    }
}
