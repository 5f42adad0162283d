use std::{collections::HashMap, sync::Arc, time::Duration};

use common::{
    error::AppError,
    topics::{
        index::BuildError,
        registry::TopicRegistry,
        topic::Topic,
    },
};
use futures::future::join_all;
use query_router::{AgentHandle, RouterHandle};
use state_machines::state_machine;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::builder::TopicIndexBuilder;

/// Observable per-topic build lifecycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    #[default]
    Idle,
    Building,
    Failed,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Idle => "Idle",
            BuildPhase::Building => "Building",
            BuildPhase::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BuildTransition {
    Trigger,
    Complete,
    Fail,
}

impl BuildTransition {
    fn as_str(&self) -> &'static str {
        match self {
            BuildTransition::Trigger => "trigger",
            BuildTransition::Complete => "complete",
            BuildTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: TopicBuildMachine,
        initial: Idle,
        states: [Idle, Building, Failed],
        events {
            trigger {
                transition: { from: Idle, to: Building }
                transition: { from: Failed, to: Building }
            }
            complete {
                transition: { from: Building, to: Idle }
            }
            fail {
                transition: { from: Building, to: Failed }
            }
        }
    }

    pub(super) fn idle() -> TopicBuildMachine<(), Idle> {
        TopicBuildMachine::new(())
    }

    pub(super) fn building() -> TopicBuildMachine<(), Building> {
        idle()
            .trigger()
            .expect("trigger transition from Idle should exist")
    }

    pub(super) fn failed() -> TopicBuildMachine<(), Failed> {
        building()
            .fail()
            .expect("fail transition from Building should exist")
    }
}

fn invalid_transition(state: BuildPhase, event: BuildTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid build transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(state: BuildPhase, event: BuildTransition) -> Result<BuildPhase, AppError> {
    use lifecycle::*;
    match (state, event) {
        (BuildPhase::Idle, BuildTransition::Trigger) => idle()
            .trigger()
            .map(|_| BuildPhase::Building)
            .map_err(|_| invalid_transition(state, event)),
        (BuildPhase::Failed, BuildTransition::Trigger) => failed()
            .trigger()
            .map(|_| BuildPhase::Building)
            .map_err(|_| invalid_transition(state, event)),
        (BuildPhase::Building, BuildTransition::Complete) => building()
            .complete()
            .map(|_| BuildPhase::Idle)
            .map_err(|_| invalid_transition(state, event)),
        (BuildPhase::Building, BuildTransition::Fail) => building()
            .fail()
            .map(|_| BuildPhase::Failed)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

#[derive(Debug, Default)]
struct BuildSlot {
    phase: BuildPhase,
    /// Set when a trigger lands while a build is in flight; the running
    /// build loop consumes it and goes again, so no upload is lost.
    rerun_requested: bool,
    last_error: Option<String>,
}

/// Drives per-topic rebuilds: coalesces triggers, bounds build time, installs
/// finished indexes and recomposes the router and agent views.
///
/// One build runs per topic at a time; distinct topics build concurrently.
/// A failed or timed-out build leaves the topic's previous index serving.
pub struct RebuildCoordinator {
    registry: Arc<TopicRegistry>,
    builder: Arc<dyn TopicIndexBuilder>,
    router: Arc<RouterHandle>,
    agent: Arc<AgentHandle>,
    build_timeout: Duration,
    slots: Mutex<HashMap<String, BuildSlot>>,
}

impl RebuildCoordinator {
    pub fn new(
        registry: Arc<TopicRegistry>,
        builder: Arc<dyn TopicIndexBuilder>,
        router: Arc<RouterHandle>,
        agent: Arc<AgentHandle>,
        build_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            builder,
            router,
            agent,
            build_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Current lifecycle phase of a topic; topics never triggered are Idle.
    pub async fn phase(&self, topic: &str) -> BuildPhase {
        let slots = self.slots.lock().await;
        slots.get(topic).map(|slot| slot.phase).unwrap_or_default()
    }

    /// Message of the most recently settled build failure, cleared on the
    /// next successful build.
    pub async fn last_error(&self, topic: &str) -> Option<String> {
        let slots = self.slots.lock().await;
        slots.get(topic).and_then(|slot| slot.last_error.clone())
    }

    /// Requests a rebuild of `topic` and returns immediately.
    ///
    /// If a build for the topic is already in flight the request is folded
    /// into it: the running loop rebuilds once more after finishing, which
    /// picks up every document present by then.
    pub async fn schedule(self: Arc<Self>, topic: Arc<Topic>) -> Result<(), AppError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(topic.name.clone()).or_default();

        if slot.phase == BuildPhase::Building {
            slot.rerun_requested = true;
            debug!(topic = %topic.name, "Coalesced rebuild trigger into running build");
            return Ok(());
        }

        slot.phase = compute_next_state(slot.phase, BuildTransition::Trigger)?;
        drop(slots);

        tokio::spawn(async move {
            self.run_build_loop(topic).await;
        });
        Ok(())
    }

    /// Builds every registered topic concurrently, then recomposes the
    /// router snapshot once. Used at startup after topic discovery.
    pub async fn build_all(&self) -> Result<(), AppError> {
        let topics = self.registry.topics();
        {
            let mut slots = self.slots.lock().await;
            for topic in &topics {
                let slot = slots.entry(topic.name.clone()).or_default();
                slot.phase = compute_next_state(slot.phase, BuildTransition::Trigger)?;
            }
        }

        let outcomes = join_all(topics.iter().map(|topic| async move {
            let outcome = self.build_and_install(topic).await;
            (Arc::clone(topic), outcome)
        }))
        .await;

        {
            let mut slots = self.slots.lock().await;
            for (topic, outcome) in outcomes {
                let slot = slots.entry(topic.name.clone()).or_default();
                match outcome {
                    Ok(generation) => {
                        info!(topic = %topic.name, generation, "Startup index build complete");
                        slot.phase =
                            compute_next_state(slot.phase, BuildTransition::Complete)?;
                        slot.last_error = None;
                    }
                    Err(err) => {
                        error!(topic = %topic.name, error = %err, "Startup index build failed");
                        slot.phase = compute_next_state(slot.phase, BuildTransition::Fail)?;
                        slot.last_error = Some(err.to_string());
                    }
                }
            }
        }

        let snapshot = self.router.recompose(&self.registry).await;
        self.agent.refresh(snapshot).await;
        Ok(())
    }

    /// Runs builds for one topic until no rerun is pending, then settles the
    /// slot. Exactly one loop runs per topic at a time.
    async fn run_build_loop(self: Arc<Self>, topic: Arc<Topic>) {
        loop {
            let failure = match self.build_and_install(&topic).await {
                Ok(generation) => {
                    let snapshot = self.router.recompose(&self.registry).await;
                    self.agent.refresh(snapshot).await;
                    info!(topic = %topic.name, generation, "Installed rebuilt index");
                    None
                }
                Err(err) => {
                    error!(
                        topic = %topic.name,
                        error = %err,
                        "Index rebuild failed, previous index stays in service"
                    );
                    Some(err.to_string())
                }
            };

            let mut slots = self.slots.lock().await;
            let Some(slot) = slots.get_mut(&topic.name) else {
                return;
            };

            if slot.rerun_requested {
                slot.rerun_requested = false;
                drop(slots);
                continue;
            }

            let transition = if failure.is_some() {
                BuildTransition::Fail
            } else {
                BuildTransition::Complete
            };
            match compute_next_state(slot.phase, transition) {
                Ok(next) => slot.phase = next,
                Err(err) => error!(topic = %topic.name, error = %err, "Build slot out of sync"),
            }
            slot.last_error = failure;
            return;
        }
    }

    /// One bounded build attempt; on success the index goes live for the
    /// topic immediately.
    async fn build_and_install(&self, topic: &Topic) -> Result<u64, BuildError> {
        let build = self.builder.build(&topic.name, &topic.documents_dir);
        let index = match tokio::time::timeout(self.build_timeout, build).await {
            Ok(result) => result?,
            Err(_) => return Err(BuildError::Timeout(self.build_timeout)),
        };
        Ok(topic.install_index(Arc::new(index)).await)
    }
}
