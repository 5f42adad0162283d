use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    topics::index::{BuildError, IndexedChunk, TopicIndex},
    utils::embedding::EmbeddingProvider,
};
use text_splitter::TextSplitter;
use tracing::{debug, warn};

/// Chunk size window handed to the splitter, in characters.
const CHUNK_SIZE_RANGE: std::ops::Range<usize> = 500..2000;

/// Builds a fresh index from a topic's document directory.
///
/// A build is a pure function of the directory contents at read time: it
/// touches no shared state, so the coordinator can run one per topic
/// concurrently and install whichever finishes.
#[async_trait]
pub trait TopicIndexBuilder: Send + Sync {
    async fn build(&self, topic: &str, documents_dir: &Path) -> Result<TopicIndex, BuildError>;
}

/// Production builder: read, chunk and embed every regular file in the
/// topic directory. Subdirectories are other topics' homes and are ignored.
pub struct IndexBuilder {
    embedding: Arc<EmbeddingProvider>,
}

impl IndexBuilder {
    pub fn new(embedding: Arc<EmbeddingProvider>) -> Self {
        Self { embedding }
    }
}

#[async_trait]
impl TopicIndexBuilder for IndexBuilder {
    async fn build(&self, topic: &str, documents_dir: &Path) -> Result<TopicIndex, BuildError> {
        let unreadable = |source: std::io::Error| BuildError::UnreadableDocumentSet {
            path: documents_dir.display().to_string(),
            source,
        };

        let mut entries = tokio::fs::read_dir(documents_dir).await.map_err(unreadable)?;

        let mut document_count = 0usize;
        let mut skipped_documents = Vec::new();
        let mut pending_chunks: Vec<(String, String)> = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map(|kind| kind.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            let source = entry.file_name().to_string_lossy().into_owned();
            match extract_text(&path).await {
                Ok(text) => {
                    document_count += 1;
                    let splitter = TextSplitter::new(CHUNK_SIZE_RANGE);
                    for chunk in splitter.chunks(&text) {
                        pending_chunks.push((source.clone(), chunk.to_string()));
                    }
                }
                Err(err) => {
                    warn!(topic, document = %source, error = %err, "Skipping unreadable document");
                    skipped_documents.push(source);
                }
            }
        }
        skipped_documents.sort();

        let texts: Vec<String> = pending_chunks.iter().map(|(_, text)| text.clone()).collect();
        let embeddings = self
            .embedding
            .embed_batch(texts)
            .await
            .map_err(|err| BuildError::Engine(err.to_string()))?;
        if embeddings.len() != pending_chunks.len() {
            return Err(BuildError::Engine(format!(
                "Embedding count mismatch: {} chunks, {} embeddings",
                pending_chunks.len(),
                embeddings.len()
            )));
        }

        let chunks = pending_chunks
            .into_iter()
            .zip(embeddings)
            .map(|((source, text), embedding)| IndexedChunk {
                text,
                source,
                embedding,
            })
            .collect::<Vec<_>>();

        debug!(
            topic,
            documents = document_count,
            chunks = chunks.len(),
            skipped = skipped_documents.len(),
            "Built topic index"
        );

        Ok(TopicIndex {
            topic: topic.to_string(),
            chunks,
            document_count,
            skipped_documents,
            built_at: Utc::now(),
        })
    }
}

/// Text of a single document. PDFs go through the blocking extractor on a
/// worker thread; everything else must be valid UTF-8.
async fn extract_text(path: &Path) -> anyhow::Result<String> {
    let is_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        let path = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path)).await??;
        Ok(text)
    } else {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}
