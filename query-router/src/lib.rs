#![allow(clippy::missing_docs_in_private_items)]

pub mod agent;
pub mod router;

pub use agent::AgentHandle;
pub use router::{QueryRouter, RouterHandle, RouterSnapshot, TopicAnswer, ToolDescriptor};
