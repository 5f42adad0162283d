pub mod ask_agent;
pub mod liveness;
pub mod query;
pub mod readiness;
pub mod topics;
pub mod upload;
