// ABOUTME: HTTP API layer for the code-execution gateway providing routing and shared state
// ABOUTME: Thin axum surface over the session manager with API key authentication

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use rce_sandbox::SessionManager;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error;
pub mod handlers;

pub use error::AppError;

/// Largest accepted request body (uploads included)
pub const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            manager,
            api_key: api_key.into(),
        }
    }
}

/// Creates the gateway router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Code execution endpoints
        .route("/run", post(handlers::run_code))
        .route("/run/exec", post(handlers::run_code))
        .route("/exec", post(handlers::run_code))
        // File transfer endpoints
        .route("/upload", post(handlers::upload_files))
        .route("/files/{session_id}", get(handlers::list_files))
        .route("/download", get(handlers::download_by_query))
        .route(
            "/download/{session_id}/{file_id}",
            get(handlers::download_file),
        )
        .route("/health", get(handlers::health_check))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::api_key_middleware,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
