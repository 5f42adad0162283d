use std::{sync::Arc, time::Duration};

use api_router::{api_routes, api_state::ApiState};
use axum::Router;
use common::{
    topics::registry::TopicRegistry,
    utils::{
        answer::AnswerProvider,
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
    },
};
use index_pipeline::{IndexBuilder, RebuildCoordinator, TopicIndexBuilder};
use query_router::{AgentHandle, QueryRouter, RouterHandle, RouterSnapshot};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding = Arc::new(EmbeddingProvider::from_config(
        &config,
        Some(openai_client.clone()),
    )?);
    let answers = Arc::new(AnswerProvider::from_config(&config, Some(openai_client))?);
    info!(
        embedding_backend = embedding.backend_label(),
        embedding_dimension = embedding.dimension(),
        answer_backend = answers.backend_label(),
        "Providers initialized"
    );

    let app = assemble_app(config.clone(), embedding, answers).await?;

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Wires the registry, coordinator, router and agent together, runs the
/// startup build of every discovered topic and returns the ready router.
async fn assemble_app(
    config: AppConfig,
    embedding: Arc<EmbeddingProvider>,
    answers: Arc<AnswerProvider>,
) -> anyhow::Result<Router> {
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let registry = Arc::new(TopicRegistry::new(config.data_dir.clone().into()));
    registry.discover()?;
    info!(topics = ?registry.list(), "Discovered topics");

    let router_handle = Arc::new(RouterHandle::new(RouterSnapshot::empty()));
    let agent_handle = Arc::new(AgentHandle::new(
        Arc::new(RouterSnapshot::empty()),
        embedding.clone(),
        answers.clone(),
    ));
    let query = Arc::new(QueryRouter::new(
        registry.clone(),
        router_handle.clone(),
        embedding.clone(),
        answers,
    ));

    let builder: Arc<dyn TopicIndexBuilder> = Arc::new(IndexBuilder::new(embedding));
    let coordinator = Arc::new(RebuildCoordinator::new(
        registry.clone(),
        builder,
        router_handle,
        agent_handle.clone(),
        Duration::from_secs(config.build_timeout_secs),
    ));

    coordinator.build_all().await?;

    let api_state = ApiState::new(config, registry, coordinator, query, agent_handle);

    // Browser clients are served from a different origin.
    Ok(Router::new()
        .merge(api_routes(&api_state))
        .layer(CorsLayer::permissive())
        .with_state(api_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use common::utils::config::{AnswerBackendKind, EmbeddingBackendKind};
    use std::path::Path;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_config(data_dir: &Path) -> AppConfig {
        AppConfig {
            data_dir: data_dir.to_string_lossy().into_owned(),
            http_port: 0,
            embedding_backend: EmbeddingBackendKind::Hashed,
            embedding_dimensions: 64,
            answer_backend: AnswerBackendKind::Extractive,
            ..Default::default()
        }
    }

    async fn test_app(data_dir: &Path) -> Router {
        let config = test_config(data_dir);
        // Deterministic offline backends keep these tests network-free.
        let embedding = Arc::new(EmbeddingProvider::from_config(&config, None).expect("embedding"));
        let answers = Arc::new(AnswerProvider::from_config(&config, None).expect("answers"));
        assemble_app(config, embedding, answers)
            .await
            .expect("assemble app")
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    fn json_request(uri: &str, payload: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request")
    }

    fn upload_request(topic: &str, file_name: &str, content: &str) -> Request<Body> {
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"topic\"\r\n\r\n\
             {topic}\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             {content}\r\n\
             --{boundary}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn smoke_probes_and_banner() {
        let dir = TempDir::new().expect("dir");
        let app = test_app(dir.path()).await;

        let live = app
            .clone()
            .oneshot(Request::builder().uri("/live").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(live.status(), StatusCode::OK);

        let ready = app
            .clone()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(ready.status(), StatusCode::OK);

        let banner = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(banner.status(), StatusCode::OK);
        assert!(body_string(banner).await.contains("Lets chat"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn end_to_end_upload_index_and_query() {
        let dir = TempDir::new().expect("dir");
        let app = test_app(dir.path()).await;

        let upload = app
            .clone()
            .oneshot(upload_request("science", "sky.txt", "The sky is blue."))
            .await
            .expect("response");
        assert_eq!(upload.status(), StatusCode::OK);
        assert!(body_string(upload)
            .await
            .contains("Upload complete. LLM ready to take questions"));

        // The upload returns before the rebuild finishes; poll until the
        // topic answers from its index.
        let mut answer = String::new();
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(json_request(
                    "/",
                    serde_json::json!({ "data": "What color is the sky?", "topic": "science" }),
                ))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
            answer = body_string(response).await;
            if answer.contains("blue") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(answer.contains("blue"), "topic never became ready: {answer}");

        let topics = app
            .clone()
            .oneshot(Request::builder().uri("/topics").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let listed = body_string(topics).await;
        assert!(listed.contains("general"));
        assert!(listed.contains("science"));

        let agent = app
            .clone()
            .oneshot(json_request(
                "/askagent",
                serde_json::json!({ "data": "What color is the sky?" }),
            ))
            .await
            .expect("response");
        assert_eq!(agent.status(), StatusCode::OK);
        assert!(body_string(agent).await.contains("blue"));

        let unknown = app
            .oneshot(json_request(
                "/",
                serde_json::json!({ "data": "anything", "topic": "unknown_topic" }),
            ))
            .await
            .expect("response");
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejects_empty_question_and_empty_upload() {
        let dir = TempDir::new().expect("dir");
        let app = test_app(dir.path()).await;

        let empty_question = app
            .clone()
            .oneshot(json_request("/", serde_json::json!({ "data": "   " })))
            .await
            .expect("response");
        assert_eq!(empty_question.status(), StatusCode::BAD_REQUEST);

        let boundary = "XBOUNDARYX";
        let no_file = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(format!(
                "--{boundary}\r\n\
                 Content-Disposition: form-data; name=\"topic\"\r\n\r\n\
                 science\r\n\
                 --{boundary}--\r\n"
            )))
            .expect("request");
        let response = app.oneshot(no_file).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn discovered_topics_answer_after_startup_build() {
        let dir = TempDir::new().expect("dir");
        std::fs::create_dir(dir.path().join("legal")).expect("mkdir");
        std::fs::write(
            dir.path().join("legal").join("contract.txt"),
            "The notice period is thirty days.",
        )
        .expect("write");

        // assemble_app runs build_all, so the topic is ready immediately.
        let app = test_app(dir.path()).await;
        let response = app
            .oneshot(json_request(
                "/",
                serde_json::json!({ "data": "How long is the notice period?", "topic": "legal" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("thirty days"));
    }
}
