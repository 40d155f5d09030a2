// ABOUTME: API key authentication middleware for request authorization
// ABOUTME: Compares the X-API-Key header against the configured key in constant time

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::AppState;

/// Header name carrying the API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Paths that don't require authentication
const PUBLIC_PATHS: &[&str] = &["/health"];

fn requires_authentication(path: &str) -> bool {
    !PUBLIC_PATHS.contains(&path)
}

fn keys_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// API key validation middleware
pub async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();

    if !requires_authentication(&path) {
        debug!(path = %path, "Public path, skipping API key validation");
        return Ok(next.run(request).await);
    }

    let authorized = match request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(key) => keys_match(key, &state.api_key),
        None => {
            warn!(path = %path, "Missing API key");
            return Err(AppError::Unauthorized);
        }
    };

    if !authorized {
        warn!(path = %path, "Invalid API key provided");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use rce_sandbox::test_utils::RecordingProvider;
    use rce_sandbox::{SandboxSettings, SessionManager};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_handler() -> &'static str {
        "ok"
    }

    fn create_test_app() -> Router {
        let manager = SessionManager::new(
            Arc::new(RecordingProvider::new()),
            SandboxSettings::default(),
        );
        let state = AppState::new(Arc::new(manager), "secret-key");

        Router::new()
            .route("/run", get(test_handler))
            .route("/health", get(test_handler))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                api_key_middleware,
            ))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_public_paths_bypass_auth() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = create_test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_key_returns_401() {
        let request = Request::builder().uri("/run").body(Body::empty()).unwrap();

        let response = create_test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_key_returns_detail() {
        let request = Request::builder()
            .uri("/run")
            .header(API_KEY_HEADER, "wrong-key")
            .body(Body::empty())
            .unwrap();

        let response = create_test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"detail": "Invalid API Key"}));
    }

    #[tokio::test]
    async fn test_valid_key_allows_access() {
        let request = Request::builder()
            .uri("/run")
            .header(API_KEY_HEADER, "secret-key")
            .body(Body::empty())
            .unwrap();

        let response = create_test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_keys_match_requires_exact_value() {
        assert!(keys_match("abc", "abc"));
        assert!(!keys_match("abc", "abcd"));
        assert!(!keys_match("", "abc"));
        assert!(!keys_match("abd", "abc"));
    }
}
