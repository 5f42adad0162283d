use std::{cmp::Ordering, time::Duration};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures of a single build attempt. Unreadable individual documents are
/// not errors: the builder skips them and records their names on the index.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Unreadable document set at {path}: {source}")]
    UnreadableDocumentSet {
        path: String,
        source: std::io::Error,
    },
    #[error("Retrieval engine failure: {0}")]
    Engine(String),
    #[error("Index build timed out after {0:?}")]
    Timeout(Duration),
}

/// One embedded chunk of a source document.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub text: String,
    pub source: String,
    pub embedding: Vec<f32>,
}

/// A supporting chunk paired with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub text: String,
    pub source: String,
    pub score: f32,
}

/// Queryable artifact built from a snapshot of a topic's document set.
/// Immutable once built; superseded instances are dropped when the last
/// in-flight query releases its reference.
#[derive(Debug, Clone)]
pub struct TopicIndex {
    pub topic: String,
    pub chunks: Vec<IndexedChunk>,
    pub document_count: usize,
    pub skipped_documents: Vec<String>,
    pub built_at: DateTime<Utc>,
}

impl TopicIndex {
    pub fn empty(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            chunks: Vec::new(),
            document_count: 0,
            skipped_documents: Vec::new(),
            built_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top `limit` chunks by cosine similarity to the query embedding.
    pub fn search(&self, query_embedding: &[f32], limit: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .map(|chunk| ScoredChunk {
                text: chunk.text.clone(),
                source: chunk.source.clone(),
                score: cosine_similarity(query_embedding, &chunk.embedding),
            })
            .collect();

        sort_by_score_desc(&mut scored);
        scored.truncate(limit);
        scored
    }

    /// Similarity of the best-matching chunk, used for routing across topics.
    pub fn best_score(&self, query_embedding: &[f32]) -> Option<f32> {
        self.chunks
            .iter()
            .map(|chunk| cosine_similarity(query_embedding, &chunk.embedding))
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_finite() {
        clamp_unit(similarity)
    } else {
        0.0
    }
}

pub fn sort_by_score_desc(chunks: &mut [ScoredChunk]) {
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.text.cmp(&b.text))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(chunks: Vec<(&str, Vec<f32>)>) -> TopicIndex {
        TopicIndex {
            topic: "test".into(),
            chunks: chunks
                .into_iter()
                .map(|(text, embedding)| IndexedChunk {
                    text: text.into(),
                    source: "doc.txt".into(),
                    embedding,
                })
                .collect(),
            document_count: 1,
            skipped_documents: Vec::new(),
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let index = index_with(vec![
            ("close", vec![0.9, 0.1, 0.0]),
            ("far", vec![0.1, 0.9, 0.0]),
        ]);

        let results = index.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "close");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_search_truncates_to_limit() {
        let index = index_with(vec![
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.9, 0.1]),
            ("c", vec![0.8, 0.2]),
        ]);
        assert_eq!(index.search(&[1.0, 0.0], 2).len(), 2);
    }

    #[test]
    fn test_empty_index_answers_nothing() {
        let index = TopicIndex::empty("fresh");
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 5).is_empty());
        assert!(index.best_score(&[1.0, 0.0]).is_none());
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_best_score_picks_maximum() {
        let index = index_with(vec![
            ("weak", vec![0.1, 0.9]),
            ("strong", vec![1.0, 0.0]),
        ]);
        let best = index.best_score(&[1.0, 0.0]).expect("score");
        assert!((best - 1.0).abs() < 1e-6);
    }
}
