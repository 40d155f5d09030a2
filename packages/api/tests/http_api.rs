// ABOUTME: End-to-end tests of the HTTP surface against the recording sandbox provider
// ABOUTME: Covers execution, upload, listing, download, capacity and authentication responses

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use rce_api::{auth::API_KEY_HEADER, create_router, AppState};
use rce_sandbox::test_utils::{arithmetic_responder, Op, RecordingProvider};
use rce_sandbox::{SandboxSettings, SessionManager};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const API_KEY: &str = "test-key";
const BOUNDARY: &str = "rce-test-boundary";

fn create_test_app(settings: SandboxSettings) -> (Arc<RecordingProvider>, Router) {
    let provider = Arc::new(RecordingProvider::new());
    provider.respond_with(arithmetic_responder);
    let manager = Arc::new(SessionManager::new(provider.clone(), settings));
    (provider, create_router(AppState::new(manager, API_KEY)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn run_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/run")
        .header(API_KEY_HEADER, API_KEY)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(API_KEY_HEADER, API_KEY)
        .body(Body::empty())
        .unwrap()
}

/// Multipart body from `(field, filename, content)` parts; text fields have no filename
fn upload_request(uri: &str, parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (field, filename, content) in parts {
        body.push_str(&format!("--{}\r\n", BOUNDARY));
        match filename {
            Some(filename) => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                field, filename
            )),
            None => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                field
            )),
        }
        body.push_str(content);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(API_KEY_HEADER, API_KEY)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_run_displays_trailing_expression() {
    let (_provider, app) = create_test_app(SandboxSettings::default());

    let (status, json) = send_json(&app, run_request(json!({"code": "1 + 1"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stdout"], "2\n");
    assert_eq!(json["stderr"], "");
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["files"], json!([]));
    assert_eq!(json["session_id"].as_str().unwrap().len(), 21);
}

#[tokio::test]
async fn test_run_reuses_session_by_public_id() {
    let (provider, app) = create_test_app(SandboxSettings::default());

    let (_, first) = send_json(&app, run_request(json!({"code": "x = 1"}))).await;
    let public_id = first["session_id"].as_str().unwrap().to_string();

    for uri in ["/run", "/run/exec", "/exec"] {
        let mut request = run_request(json!({"code": "1 + 1", "session_id": public_id}));
        *request.uri_mut() = uri.parse().unwrap();
        let (status, json) = send_json(&app, request).await;

        assert_eq!(status, StatusCode::OK, "{}", uri);
        assert_eq!(json["session_id"], public_id.as_str());
    }

    assert_eq!(provider.count(Op::Create), 1);
}

#[tokio::test]
async fn test_upload_strips_directory_components() {
    let (_provider, app) = create_test_app(SandboxSettings::default());

    let (status, json) = send_json(
        &app,
        upload_request("/upload", &[("file", Some("../../secret.txt"), "x")]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "success");
    assert_eq!(json["filename"], "secret.txt");
    assert_eq!(json["files"][0]["filename"], "secret.txt");

    let public_id = json["session_id"].as_str().unwrap();
    let (status, listing) = send_json(&app, get_request(&format!("/files/{}", public_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing, json!({"files": ["secret.txt"]}));
}

#[tokio::test]
async fn test_uploaded_file_is_reported_and_downloadable() {
    let (_provider, app) = create_test_app(SandboxSettings::default());

    let (_, uploaded) = send_json(
        &app,
        upload_request(
            "/upload",
            &[("entity_id", None, "tenant-1"), ("files", Some("data.csv"), "a,b\n")],
        ),
    )
    .await;
    let public_id = uploaded["session_id"].as_str().unwrap().to_string();
    let file_id = uploaded["files"][0]["id"].as_str().unwrap().to_string();

    // The run response reports the file under the same id
    let (_, run) = send_json(
        &app,
        run_request(json!({"code": "1 + 1", "session_id": public_id})),
    )
    .await;
    assert_eq!(run["files"], json!([{"id": file_id, "name": "data.csv"}]));

    let response = app
        .clone()
        .oneshot(get_request(&format!("/download/{}/{}", public_id, file_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"data.csv\""
    );
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"a,b\n");

    let (status, body) = send(
        &app,
        get_request(&format!(
            "/download?session_id={}&filename=data.csv",
            public_id
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"a,b\n");
}

#[tokio::test]
async fn test_upload_prefers_files_parts_over_file_parts() {
    let (_provider, app) = create_test_app(SandboxSettings::default());

    let (status, json) = send_json(
        &app,
        upload_request(
            "/upload?session_id=s1",
            &[
                ("file", Some("ignored.txt"), "0"),
                ("files", Some("a.txt"), "1"),
                ("files", Some("b.txt"), "2"),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = json["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["filename"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
    assert!(json.get("filename").is_none());
}

#[tokio::test]
async fn test_upload_without_files_is_unprocessable() {
    let (provider, app) = create_test_app(SandboxSettings::default());

    let (status, _) = send(
        &app,
        upload_request("/upload", &[("session_id", None, "s1")]),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(provider.count(Op::Create), 0);
}

#[tokio::test]
async fn test_upload_with_empty_filename_is_bad_request() {
    let (provider, app) = create_test_app(SandboxSettings::default());

    let (status, _) = send(&app, upload_request("/upload", &[("file", Some(".."), "x")])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_download_missing_file_is_404() {
    let (_provider, app) = create_test_app(SandboxSettings::default());
    let (_, run) = send_json(&app, run_request(json!({"code": "x = 1"}))).await;
    let public_id = run["session_id"].as_str().unwrap();

    let (status, json) = send_json(
        &app,
        get_request(&format!("/download/{}/missing.txt", public_id)),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["detail"], "File not found: missing.txt");
}

#[tokio::test]
async fn test_capacity_exhaustion_is_503() {
    let (_provider, app) = create_test_app(SandboxSettings {
        max_sessions: 1,
        ..SandboxSettings::default()
    });

    let (status, _) = send(&app, run_request(json!({"code": "x = 1"}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send_json(&app, run_request(json!({"code": "x = 1"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["detail"], "Server is at capacity (1 sessions)");
}

#[tokio::test]
async fn test_execution_failure_is_sanitized_500() {
    let (provider, app) = create_test_app(SandboxSettings::default());
    provider.fail_next(
        Op::Run,
        rce_sandbox::ProviderError::Internal("exec socket reset".to_string()),
    );

    let (status, json) = send_json(&app, run_request(json!({"code": "1 + 1"}))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json["detail"],
        "An internal error occurred during code execution."
    );
}

#[tokio::test]
async fn test_requests_without_key_are_rejected() {
    let (provider, app) = create_test_app(SandboxSettings::default());
    let mut request = run_request(json!({"code": "1 + 1"}));
    request.headers_mut().remove(API_KEY_HEADER);

    let (status, json) = send_json(&app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json, json!({"detail": "Invalid API Key"}));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let (_provider, app) = create_test_app(SandboxSettings::default());
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, json) = send_json(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"status": "ok", "mode": "docker-sandboxed"}));
}
