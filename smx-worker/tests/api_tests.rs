//! HTTP surface tests: auth, validation, status codes

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use http_body_util::BodyExt;
use tower::util::ServiceExt;

fn post_jobs(body: &serde_json::Value, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_worker_identity() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body, serde_json::json!({"ok": true, "worker": "soundmaxx"}));
}

#[tokio::test]
async fn post_jobs_requires_bearer() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path()));
    let body = job_request_body(
        "job-1",
        "key_bpm",
        "https://example.com/a.wav",
        "https://example.com/hook",
        serde_json::json!({}),
    );

    let response = app
        .clone()
        .oneshot(post_jobs(&body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(post_jobs(&body, Some("wrong-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_jobs_requires_bearer_and_existence() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs/ghost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/jobs/ghost")
                .header("authorization", format!("Bearer {TEST_API_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn short_webhook_secret_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path()));

    let mut body = job_request_body(
        "job-1",
        "key_bpm",
        "https://example.com/a.wav",
        "https://example.com/hook",
        serde_json::json!({}),
    );
    body["callback"]["webhookSecret"] = serde_json::json!("short");

    let response = app
        .oneshot(post_jobs(&body, Some(TEST_API_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_tool_type_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path()));

    let mut body = job_request_body(
        "job-1",
        "key_bpm",
        "https://example.com/a.wav",
        "https://example.com/hook",
        serde_json::json!({}),
    );
    body["toolType"] = serde_json::json!("beat_grid");

    let response = app
        .oneshot(post_jobs(&body, Some(TEST_API_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn oversized_policy_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path()));

    let mut body = job_request_body(
        "job-1",
        "key_bpm",
        "https://example.com/a.wav",
        "https://example.com/hook",
        serde_json::json!({}),
    );
    body["dataset"]["policyVersion"] = serde_json::json!("v".repeat(65));

    let response = app
        .oneshot(post_jobs(&body, Some(TEST_API_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn accepted_job_returns_queued_status() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path()));

    // The source URL is unreachable; acceptance is still immediate
    let body = job_request_body(
        "job-queued",
        "key_bpm",
        "http://127.0.0.1:9/audio/a.wav",
        "http://127.0.0.1:9/hook",
        serde_json::json!({}),
    );

    let response = app
        .oneshot(post_jobs(&body, Some(TEST_API_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = response_json(response).await;
    assert_eq!(status["externalJobId"], "job-queued");
    assert_eq!(status["status"], "queued");
    assert_eq!(status["model"], "essentia");
    assert_eq!(status["etaSec"], 180);
    assert_eq!(status["progressPct"], 5);
    assert_eq!(status["artifacts"], serde_json::json!([]));
}
