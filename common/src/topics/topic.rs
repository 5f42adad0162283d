use std::{path::PathBuf, sync::Arc};

use tokio::sync::RwLock;

use crate::topics::index::TopicIndex;

/// The index a topic currently serves, tagged with its build generation.
#[derive(Debug, Clone)]
pub struct InstalledIndex {
    pub generation: u64,
    pub index: Arc<TopicIndex>,
}

/// A named bucket of documents with its current retrieval index.
///
/// The `current` cell is the only mutable state: indexes are immutable values
/// and readers clone the `Arc` out, so a query concurrent with an install
/// sees either the old or the new index in its entirety, never a mix.
#[derive(Debug)]
pub struct Topic {
    pub name: String,
    pub documents_dir: PathBuf,
    current: RwLock<Option<InstalledIndex>>,
}

impl Topic {
    pub fn new(name: impl Into<String>, documents_dir: PathBuf) -> Self {
        Self {
            name: name.into(),
            documents_dir,
            current: RwLock::new(None),
        }
    }

    /// Snapshot of the currently installed index, if any build has completed.
    pub async fn current_index(&self) -> Option<InstalledIndex> {
        self.current.read().await.clone()
    }

    pub async fn generation(&self) -> Option<u64> {
        self.current.read().await.as_ref().map(|i| i.generation)
    }

    /// Atomically replaces the visible index and bumps the generation.
    /// Returns the new generation number.
    pub async fn install_index(&self, index: Arc<TopicIndex>) -> u64 {
        let mut current = self.current.write().await;
        let generation = current.as_ref().map_or(1, |i| i.generation + 1);
        *current = Some(InstalledIndex { generation, index });
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_topic_has_no_index() {
        let topic = Topic::new("fresh", PathBuf::from("/tmp/fresh"));
        assert!(topic.current_index().await.is_none());
        assert!(topic.generation().await.is_none());
    }

    #[tokio::test]
    async fn test_install_bumps_generation_monotonically() {
        let topic = Topic::new("science", PathBuf::from("/tmp/science"));

        let first = topic
            .install_index(Arc::new(TopicIndex::empty("science")))
            .await;
        let second = topic
            .install_index(Arc::new(TopicIndex::empty("science")))
            .await;

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(topic.generation().await, Some(2));
    }

    #[tokio::test]
    async fn test_readers_keep_superseded_index_alive() {
        let topic = Topic::new("science", PathBuf::from("/tmp/science"));
        topic
            .install_index(Arc::new(TopicIndex::empty("science")))
            .await;

        let held = topic.current_index().await.expect("installed");
        topic
            .install_index(Arc::new(TopicIndex::empty("science")))
            .await;

        // The reader's snapshot is unaffected by the swap.
        assert_eq!(held.generation, 1);
        assert_eq!(topic.generation().await, Some(2));
    }
}
