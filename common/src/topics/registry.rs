use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use tracing::{debug, info};

use crate::{error::AppError, topics::topic::Topic};

/// Name of the implicit topic rooted at the data directory itself. Present
/// from startup so loose uploads and untargeted queries have a home.
pub const DEFAULT_TOPIC: &str = "general";

/// Authoritative mapping from topic name to document-set location.
///
/// Identity only: index lifecycle belongs to the rebuild coordinator and the
/// routing view is derived separately, so readers never observe the map
/// mid-mutation. Insertion order is kept for stable listing.
pub struct TopicRegistry {
    root: PathBuf,
    topics: RwLock<Vec<Arc<Topic>>>,
}

impl TopicRegistry {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            topics: RwLock::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers a topic, creating its document directory if needed.
    /// Idempotent: re-registering a name returns the existing entry.
    pub fn register(&self, name: &str) -> Result<Arc<Topic>, AppError> {
        let name = name.trim();
        validate_topic_name(name)?;

        {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = topics.iter().find(|t| t.name == name) {
                return Ok(Arc::clone(existing));
            }
        }

        let documents_dir = self.documents_dir_for(name);
        std::fs::create_dir_all(&documents_dir)?;

        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        // Racing registrations of the same name resolve to one entry.
        if let Some(existing) = topics.iter().find(|t| t.name == name) {
            return Ok(Arc::clone(existing));
        }

        let topic = Arc::new(Topic::new(name, documents_dir));
        topics.push(Arc::clone(&topic));
        info!(topic = name, dir = %topic.documents_dir.display(), "Registered topic");
        Ok(topic)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.iter().find(|t| t.name == name).map(Arc::clone)
    }

    /// Topic names in insertion order, default topic first.
    pub fn list(&self) -> Vec<String> {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.iter().map(|t| t.name.clone()).collect()
    }

    pub fn topics(&self) -> Vec<Arc<Topic>> {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.iter().map(Arc::clone).collect()
    }

    /// Seeds the registry at startup: the implicit default topic at the root
    /// plus one topic per immediate subdirectory. An unreadable root is fatal;
    /// there is nothing to serve without it.
    pub fn discover(&self) -> Result<(), AppError> {
        self.register(DEFAULT_TOPIC)?;

        let mut names: Vec<String> = std::fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        for name in names {
            if validate_topic_name(&name).is_err() {
                debug!(dir = %name, "Skipping non-topic directory");
                continue;
            }
            self.register(&name)?;
        }

        Ok(())
    }

    fn documents_dir_for(&self, name: &str) -> PathBuf {
        if name == DEFAULT_TOPIC {
            self.root.clone()
        } else {
            self.root.join(name)
        }
    }
}

fn validate_topic_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() {
        return Err(AppError::Validation("topic name must not be empty".into()));
    }
    if name.starts_with('.') {
        return Err(AppError::Validation(format!(
            "topic name must not start with '.': {name}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::Validation(format!(
            "topic name may only contain alphanumerics, '-' and '_': {name}"
        )));
    }
    Ok(())
}
