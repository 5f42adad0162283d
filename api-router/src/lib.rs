#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    ask_agent::ask_agent,
    liveness::live,
    query::{chat_banner, query_data},
    readiness::ready,
    topics::get_topics,
    upload::upload_documents,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for the upload/query/agent API
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probe endpoints (for k8s/systemd)
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let api = Router::new()
        .route("/", get(chat_banner).post(query_data))
        .route("/topics", get(get_topics))
        .route("/askagent", post(ask_agent))
        .route(
            "/upload",
            post(upload_documents).layer(DefaultBodyLimit::max(
                app_state.config.upload_max_body_bytes,
            )),
        );

    probes.merge(api)
}
