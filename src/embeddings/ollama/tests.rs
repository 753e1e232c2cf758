use std::time::Duration;

use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;

fn embedder_for(server: &MockServer, dimension: usize) -> OllamaEmbedder {
    let url = Url::parse(&server.uri()).expect("valid url");
    let http = HttpClient::new(Duration::from_secs(5)).with_retry_attempts(1);
    OllamaEmbedder::new(url, "nomic-embed-text", dimension, http)
}

#[tokio::test]
async fn embed_returns_first_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_json(serde_json::json!({
            "model": "nomic-embed-text",
            "input": "hello world"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "nomic-embed-text",
            "embeddings": [[0.1, 0.2, 0.3]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = embedder_for(&server, 3);
    let vector = embedder.embed("hello world").await.expect("embed should succeed");

    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    assert_eq!(embedder.model_id(), "nomic-embed-text");
}

#[tokio::test]
async fn wrong_dimension_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "embeddings": [[0.1, 0.2]] })),
        )
        .mount(&server)
        .await;

    let embedder = embedder_for(&server, 3);
    let error = embedder.embed("text").await.expect_err("dimension differs");

    assert!(matches!(
        error,
        RagError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    ));
}

#[tokio::test]
async fn server_failure_maps_to_backend_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let embedder = embedder_for(&server, 3);
    let error = embedder.embed("text").await.expect_err("server failed");

    assert!(matches!(error, RagError::BackendUnavailable(_)));
}

#[tokio::test]
async fn health_check_accepts_latest_tag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "nomic-embed-text:latest", "size": 1234 }]
        })))
        .mount(&server)
        .await;

    let embedder = embedder_for(&server, 3);
    embedder.health_check().await.expect("model should be found");
}

#[tokio::test]
async fn health_check_reports_missing_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "llama3.2:latest" }]
        })))
        .mount(&server)
        .await;

    let embedder = embedder_for(&server, 3);
    let error = embedder.health_check().await.expect_err("model missing");

    assert!(error.to_string().contains("nomic-embed-text"));
}
