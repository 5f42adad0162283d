use std::sync::Arc;

use common::{topics::registry::TopicRegistry, utils::config::AppConfig};
use index_pipeline::RebuildCoordinator;
use query_router::{AgentHandle, QueryRouter};

#[derive(Clone)]
pub struct ApiState {
    pub config: AppConfig,
    pub registry: Arc<TopicRegistry>,
    pub coordinator: Arc<RebuildCoordinator>,
    pub query: Arc<QueryRouter>,
    pub agent: Arc<AgentHandle>,
}

impl ApiState {
    pub fn new(
        config: AppConfig,
        registry: Arc<TopicRegistry>,
        coordinator: Arc<RebuildCoordinator>,
        query: Arc<QueryRouter>,
        agent: Arc<AgentHandle>,
    ) -> Self {
        Self {
            config,
            registry,
            coordinator,
            query,
            agent,
        }
    }
}
