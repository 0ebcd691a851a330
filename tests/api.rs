#![cfg(unix)]

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use common::{wait_terminal, Fixture};
use gelscan::config::{AnalysisDefaults, UploadConfig};
use gelscan::handlers::build_router;
use gelscan::models::JobStatus;
use gelscan::services::UploadStore;
use gelscan::AppState;

const BOUNDARY: &str = "gelscan-test-boundary";

fn router(fixture: &Fixture) -> Router {
    let uploads = UploadStore::new(&UploadConfig {
        max_file_size: 1024 * 1024,
        upload_dir: fixture.dir.path().join("uploads"),
        allowed_extensions: vec!["png".into(), "jpg".into()],
        max_age_hours: 24,
        sweep_interval_secs: 3600,
    });
    let defaults = AnalysisDefaults { score_threshold: 0.8, mask_threshold: 0.8, class_count: 2 };
    let state = AppState::new(fixture.manager.clone(), uploads, &defaults);
    build_router(state, 1024 * 1024)
}

fn multipart_body(filename: &str, content: &str, fields: &[(&str, &str)]) -> Body {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            BOUNDARY, name, value
        ));
    }
    body.push_str(&format!(
        "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n{}\r\n--{}--\r\n",
        BOUNDARY, filename, content, BOUNDARY
    ));
    Body::from(body)
}

fn upload_request(body: Body) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(body)
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn unknown_job_status_is_not_found() {
    let fixture = Fixture::new();
    let response = router(&fixture).oneshot(get("/api/job/nope/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["status"], "not_found");
}

#[tokio::test]
async fn cancel_of_unknown_job_reports_failure() {
    let fixture = Fixture::new();
    let request = Request::builder()
        .method("POST")
        .uri("/api/job/nope/cancel")
        .body(Body::empty())
        .unwrap();
    let response = router(&fixture).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["job_id"], "nope");
}

#[tokio::test]
async fn system_status_always_answers() {
    let fixture = Fixture::new();
    let response = router(&fixture).oneshot(get("/api/system/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body.get("cpu_percent").is_some());
    assert!(body.get("active_job_count").is_some());
}

#[tokio::test]
async fn debug_system_reports_pipeline_layout() {
    let fixture = Fixture::new();
    let response = router(&fixture).oneshot(get("/debug/system")).await.unwrap();

    let body = json_body(response).await;
    assert_eq!(body["tool_available"], true);
    assert_eq!(body["definition_exists"], true);
    assert_eq!(body["model_exists"], true);
}

#[tokio::test]
async fn rejects_uploads_with_bad_extension() {
    let fixture = Fixture::new();
    let response = router(&fixture)
        .oneshot(upload_request(multipart_body("script.sh", "success", &[])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(fixture.manager.list_jobs().is_empty());
}

#[tokio::test]
async fn rejects_out_of_range_thresholds() {
    let fixture = Fixture::new();
    let body = multipart_body("gel.png", "success", &[("score_threshold", "1.5")]);
    let response = router(&fixture).oneshot(upload_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(fixture.manager.list_jobs().is_empty());
}

#[tokio::test]
async fn upload_runs_job_and_serves_results() {
    let fixture = Fixture::new();
    let app = router(&fixture);

    let body = multipart_body("gel.png", "success", &[("score_threshold", "0.5"), ("class_count", "3")]);
    let response = app.clone().oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "started");
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert!(body["record"]["command"].as_str().unwrap().contains("--score_threshold 0.5"));
    assert_eq!(body["record"]["params"]["class_count"], 3);

    let record = wait_terminal(&fixture.manager, &job_id).await;
    assert_eq!(record.status, JobStatus::Completed);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/job/{}/status", job_id)))
        .await
        .unwrap();
    let status = json_body(response).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["results"]["detected_objects"], 7);
    assert!(status.get("process").is_none());

    let response = app
        .clone()
        .oneshot(get(&format!("/download/{}/test_results.txt", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("Detected objects: 7"));

    let response = app
        .clone()
        .oneshot(get(&format!("/download/{}/missing.png", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(get(&format!("/download/{}/a%20b.txt", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/api/jobs")).await.unwrap();
    let jobs = json_body(response).await;
    assert_eq!(jobs[&job_id]["status"], "completed");
}
