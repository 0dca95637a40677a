//! Ollama engine against a stubbed HTTP server.

use std::time::Duration;

use critique_core::Error;
use critique_inference::{
    AdapterCatalog, GenerateRequest, InferenceEngine, InferenceTask, OllamaVisionEngine,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JPEG: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];

fn request<'a>(task: InferenceTask, adapter: Option<&'a str>) -> GenerateRequest<'a> {
    GenerateRequest {
        task,
        image: JPEG,
        mime_type: "image/jpeg",
        system: "You are Ansel Adams.",
        prompt: "Score this photograph.",
        adapter,
    }
}

#[tokio::test]
async fn test_generate_posts_image_and_returns_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "qwen2.5vl:7b",
            "system": "You are Ansel Adams.",
            "images": ["/9j/4AAQ"],
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "qwen2.5vl:7b",
            "response": "{\"scores\": {\"composition\": 8}}",
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = OllamaVisionEngine::new(
        server.uri(),
        "qwen2.5vl:7b",
        AdapterCatalog::new("/nonexistent"),
    );
    let out = engine
        .generate(request(InferenceTask::Extraction, None))
        .await
        .unwrap();
    assert_eq!(out, "{\"scores\": {\"composition\": 8}}");
}

#[tokio::test]
async fn test_generate_uses_adapter_serving_model() {
    let adapters = tempfile::tempdir().unwrap();
    std::fs::create_dir(adapters.path().join("ansel_adams")).unwrap();
    std::fs::write(
        adapters.path().join("ansel_adams/adapter_model.safetensors"),
        b"weights",
    )
    .unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "model": "critique-ansel_adams" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ok" })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = OllamaVisionEngine::new(
        server.uri(),
        "qwen2.5vl:7b",
        AdapterCatalog::new(adapters.path()),
    );
    assert!(engine.has_adapter("ansel_adams").await.unwrap());
    assert!(!engine.has_adapter("dorothea_lange").await.unwrap());

    let out = engine
        .generate(request(InferenceTask::Critique, Some("ansel_adams")))
        .await
        .unwrap();
    assert_eq!(out, "ok");
}

#[tokio::test]
async fn test_server_error_is_inference_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let engine = OllamaVisionEngine::new(
        server.uri(),
        "qwen2.5vl:7b",
        AdapterCatalog::new("/nonexistent"),
    );
    let err = engine
        .generate(request(InferenceTask::Extraction, None))
        .await
        .unwrap_err();
    match err {
        Error::Inference(msg) => assert!(msg.contains("model not loaded")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_is_inference_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "late" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let engine = OllamaVisionEngine::new(
        server.uri(),
        "qwen2.5vl:7b",
        AdapterCatalog::new("/nonexistent"),
    )
    .with_timeout(Duration::from_millis(50));
    let err = engine
        .generate(request(InferenceTask::Critique, None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Inference(ref m) if m.contains("timed out")));
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&server)
        .await;

    let engine = OllamaVisionEngine::new(
        server.uri(),
        "qwen2.5vl:7b",
        AdapterCatalog::new("/nonexistent"),
    );
    assert!(engine.health_check().await.unwrap());

    let down = OllamaVisionEngine::new(
        "http://127.0.0.1:9",
        "qwen2.5vl:7b",
        AdapterCatalog::new("/nonexistent"),
    );
    assert!(!down.health_check().await.unwrap());
}
