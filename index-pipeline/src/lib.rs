#![allow(clippy::missing_docs_in_private_items)]

pub mod builder;
pub mod coordinator;

pub use builder::{IndexBuilder, TopicIndexBuilder};
pub use coordinator::{BuildPhase, RebuildCoordinator};
