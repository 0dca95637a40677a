//! HTTP tests for the critique API against in-process stores and the scripted
//! inference engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use critique_api::{router, AppState};
use critique_core::{AdvisorCatalog, EventBus};
use critique_db::Stores;
use critique_inference::mock::MockInferenceEngine;
use critique_inference::{ExclusiveEngine, InferenceTask};
use critique_jobs::{
    JobWorker, Orchestrator, OrchestratorConfig, ProgressPublisher, WorkerConfig, WorkerHandle,
};
use reqwest::{multipart, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;

const ADVISOR: &str = "ansel_adams";

struct TestServer {
    base: String,
    client: reqwest::Client,
    _worker: WorkerHandle,
    _uploads: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

async fn spawn_server(mock: MockInferenceEngine, worker_enabled: bool) -> TestServer {
    let uploads = TempDir::new().unwrap();
    let stores = Stores::in_memory();
    let progress = ProgressPublisher::new(EventBus::new(64), stores.jobs.clone());
    let engine = Arc::new(ExclusiveEngine::new(Arc::new(mock)));
    let orchestrator = Arc::new(Orchestrator::new(
        stores,
        Arc::new(AdvisorCatalog::builtin()),
        engine,
        progress,
        OrchestratorConfig::default().with_upload_dir(uploads.path()),
    ));

    let worker = JobWorker::new(
        orchestrator.clone(),
        WorkerConfig::default()
            .with_poll_interval(10)
            .with_enabled(worker_enabled),
    )
    .start();

    let app = router(AppState::new(orchestrator));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        _worker: worker,
        _uploads: uploads,
    }
}

fn png(salt: u8) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R', salt]);
    bytes
}

fn analyze_form(advisor: &str, mode: Option<&str>, image: Vec<u8>) -> multipart::Form {
    let mut form = multipart::Form::new()
        .part(
            "image",
            multipart::Part::bytes(image)
                .file_name("photo.png")
                .mime_str("image/png")
                .unwrap(),
        )
        .text("advisor", advisor.to_string());
    if let Some(mode) = mode {
        form = form.text("mode", mode.to_string());
    }
    form
}

async fn submit(server: &TestServer, mode: &str, salt: u8) -> Value {
    let resp = server
        .client
        .post(server.url("/api/v1/analyze"))
        .multipart(analyze_form(ADVISOR, Some(mode), png(salt)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    resp.json().await.unwrap()
}

async fn wait_terminal(server: &TestServer, job_id: &str) -> Value {
    for _ in 0..300 {
        let job: Value = server
            .client
            .get(server.url(&format!("/api/v1/jobs/{}", job_id)))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if job["status"] == "done" || job["status"] == "error" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}

// =============================================================================
// Submission and results
// =============================================================================

#[tokio::test]
async fn test_analyze_then_fetch_result() {
    let server = spawn_server(MockInferenceEngine::new(), true).await;
    let accepted = submit(&server, "baseline", 1).await;
    assert_eq!(accepted["status"], "queued");
    assert_eq!(accepted["mode_requested"], "baseline");
    let job_id = accepted["job_id"].as_str().unwrap().to_string();
    assert_eq!(
        accepted["events_url"],
        format!("/api/v1/jobs/{}/events", job_id)
    );

    let job = wait_terminal(&server, &job_id).await;
    assert_eq!(job["status"], "done");
    assert_eq!(job["progress_percent"], 100);
    assert_eq!(job["mode_effective"], "baseline");

    let resp = server
        .client
        .get(server.url(&format!("/api/v1/jobs/{}/result", job_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let result: Value = resp.json().await.unwrap();
    assert_eq!(result["advisor_id"], ADVISOR);
    assert_eq!(result["mode"], "baseline");
    assert!(result["summary"].as_str().is_some_and(|s| !s.is_empty()));
}

#[tokio::test]
async fn test_rag_lora_falls_back_when_nothing_is_available() {
    let server = spawn_server(MockInferenceEngine::new(), true).await;
    let accepted = submit(&server, "rag_lora", 2).await;
    let job = wait_terminal(&server, accepted["job_id"].as_str().unwrap()).await;
    assert_eq!(job["status"], "done");
    assert_eq!(job["mode_requested"], "rag_lora");
    assert_eq!(job["mode_effective"], "baseline");
    assert_eq!(job["fell_back"], true);
}

#[tokio::test]
async fn test_analyze_rejects_unknown_advisor() {
    let server = spawn_server(MockInferenceEngine::new(), false).await;
    let resp = server
        .client
        .post(server.url("/api/v1/analyze"))
        .multipart(analyze_form("nobody", None, png(3)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().is_some());

    let jobs: Vec<Value> = server
        .client
        .get(server.url("/api/v1/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_analyze_rejects_unknown_mode() {
    let server = spawn_server(MockInferenceEngine::new(), false).await;
    let resp = server
        .client
        .post(server.url("/api/v1/analyze"))
        .multipart(analyze_form(ADVISOR, Some("hybrid"), png(4)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analyze_rejects_non_image_payload() {
    let server = spawn_server(MockInferenceEngine::new(), false).await;
    let resp = server
        .client
        .post(server.url("/api/v1/analyze"))
        .multipart(analyze_form(ADVISOR, None, b"plain text, not a photo".to_vec()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analyze_requires_image_field() {
    let server = spawn_server(MockInferenceEngine::new(), false).await;
    let form = multipart::Form::new().text("advisor", ADVISOR.to_string());
    let resp = server
        .client
        .post(server.url("/api/v1/analyze"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let server = spawn_server(MockInferenceEngine::new(), false).await;
    let id = uuid::Uuid::new_v4();
    for path in ["", "/result", "/events"] {
        let resp = server
            .client
            .get(server.url(&format!("/api/v1/jobs/{}{}", id, path)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "path {:?}", path);
    }
}

#[tokio::test]
async fn test_result_of_queued_job_is_conflict() {
    let server = spawn_server(MockInferenceEngine::new(), false).await;
    let accepted = submit(&server, "baseline", 5).await;
    let resp = server
        .client
        .get(server.url(&format!(
            "/api/v1/jobs/{}/result",
            accepted["job_id"].as_str().unwrap()
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_result_of_failed_job_carries_kind() {
    let mock = MockInferenceEngine::new().with_failure(InferenceTask::Critique);
    let server = spawn_server(mock, true).await;
    let accepted = submit(&server, "baseline", 6).await;
    let job_id = accepted["job_id"].as_str().unwrap().to_string();

    let job = wait_terminal(&server, &job_id).await;
    assert_eq!(job["status"], "error");
    assert_eq!(job["progress_percent"], 60);

    let resp = server
        .client
        .get(server.url(&format!("/api/v1/jobs/{}/result", job_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "analysis_failed");
}

// =============================================================================
// Progress stream
// =============================================================================

#[tokio::test]
async fn test_events_for_finished_job_end_with_completion() {
    let server = spawn_server(MockInferenceEngine::new(), true).await;
    let accepted = submit(&server, "baseline", 7).await;
    let job_id = accepted["job_id"].as_str().unwrap().to_string();
    wait_terminal(&server, &job_id).await;

    // The stream closes after the terminal snapshot, so the body completes.
    let resp = server
        .client
        .get(server.url(&format!("/api/v1/jobs/{}/events", job_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = tokio::time::timeout(Duration::from_secs(5), resp.text())
        .await
        .expect("event stream did not close")
        .unwrap();
    assert!(body.contains("event: job.completed"));
    assert!(body.contains(&job_id));
}

// =============================================================================
// Advisors and reference profiles
// =============================================================================

#[tokio::test]
async fn test_list_advisors() {
    let server = spawn_server(MockInferenceEngine::new(), false).await;
    let advisors: Vec<Value> = server
        .client
        .get(server.url("/api/v1/advisors"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(advisors.iter().any(|a| a["id"] == ADVISOR));
}

#[tokio::test]
async fn test_import_then_list_reference_profiles() {
    let server = spawn_server(MockInferenceEngine::new(), false).await;
    let body = json!({
        "profiles": [{
            "image_path": "refs/moonrise.jpg",
            "scores": {"composition": 9, "lighting": 10, "focus": 9},
            "metadata": {"title": "Moonrise, Hernandez"},
            "working_set": true
        }]
    });
    let resp = server
        .client
        .post(server.url(&format!("/api/v1/advisors/{}/profiles", ADVISOR)))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let imported: Value = resp.json().await.unwrap();
    assert_eq!(imported["imported"], 1);
    assert_eq!(imported["profiles"][0]["advisor_id"], ADVISOR);
    assert_eq!(imported["profiles"][0]["working_set"], false);

    let profiles: Vec<Value> = server
        .client
        .get(server.url(&format!("/api/v1/advisors/{}/profiles", ADVISOR)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["image_path"], "refs/moonrise.jpg");
}

#[tokio::test]
async fn test_import_with_out_of_range_score_is_rejected() {
    let server = spawn_server(MockInferenceEngine::new(), false).await;
    let body = json!({
        "profiles": [
            {"image_path": "refs/a.jpg", "scores": {"lighting": 8}},
            {"image_path": "refs/b.jpg", "scores": {"lighting": 14}}
        ]
    });
    let resp = server
        .client
        .post(server.url(&format!("/api/v1/advisors/{}/profiles", ADVISOR)))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let profiles: Vec<Value> = server
        .client
        .get(server.url(&format!("/api/v1/advisors/{}/profiles", ADVISOR)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(profiles.is_empty());
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_ok() {
    let server = spawn_server(MockInferenceEngine::new(), false).await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["inference"], true);
}

#[tokio::test]
async fn test_health_unavailable_when_engine_is_down() {
    let server = spawn_server(MockInferenceEngine::new().with_health(false), false).await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}
