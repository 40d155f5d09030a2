// ABOUTME: HTTP request handlers for code execution, file upload, listing and download
// ABOUTME: Translates public session and file ids to internal ones before calling the session manager

use axum::{
    extract::{Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use rce_sandbox::{FileDescriptor, SessionManager};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::AppState;

/// Request body for code execution
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub code: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Response body for code execution
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub session_id: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub files: Vec<FileDescriptor>,
}

/// A file accepted by an upload
#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub id: String,
    pub filename: String,
}

/// Response body for uploads
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub session_id: String,
    pub files: Vec<UploadedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub session_id: String,
    pub filename: String,
}

/// Internal id for an optional client-supplied session reference; a fresh
/// session when none is given
fn internal_session(manager: &SessionManager, session_ref: Option<&str>) -> String {
    match session_ref.map(str::trim).filter(|s| !s.is_empty()) {
        Some(session_ref) => manager.resolve_session_id(session_ref),
        None => SessionManager::new_session_id(),
    }
}

/// Run code in the session's sandbox
pub async fn run_code(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, AppError> {
    let manager = &state.manager;
    let internal_id = internal_session(manager, request.session_id.as_deref());
    info!(session_id = %internal_id, "Running {} bytes of code", request.code.len());

    let result = manager.execute(&internal_id, &request.code).await?;

    let files = match manager.describe_files(&internal_id).await {
        Ok(files) => files,
        Err(e) => {
            warn!(session_id = %internal_id, "Failed to list session files: {}", e);
            Vec::new()
        }
    };

    Ok(Json(RunResponse {
        session_id: manager.public_session_id(&internal_id),
        stdout: result.stdout,
        stderr: result.stderr,
        exit_code: result.exit_code,
        files,
    }))
}

/// Upload one or more files into a session workspace
pub async fn upload_files(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut session_ref = query.session_id;
    let mut files_parts = Vec::new();
    let mut file_parts = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "entity_id" | "session_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                if !value.trim().is_empty() {
                    session_ref = Some(value);
                }
            }
            "files" | "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                if field_name == "files" {
                    files_parts.push((filename, content));
                } else {
                    file_parts.push((filename, content));
                }
            }
            _ => {}
        }
    }

    let parts = if files_parts.is_empty() {
        file_parts
    } else {
        files_parts
    };
    if parts.is_empty() {
        return Err(AppError::Unprocessable("No files provided".to_string()));
    }

    let manager = &state.manager;
    let internal_id = internal_session(manager, session_ref.as_deref());

    let mut uploaded = Vec::with_capacity(parts.len());
    for (filename, content) in parts {
        let stored = manager.upload(&internal_id, &filename, &content).await?;
        uploaded.push(UploadedFile {
            id: manager.file_id(&internal_id, &stored),
            filename: stored,
        });
    }

    let filename = match uploaded.as_slice() {
        [only] => Some(only.filename.clone()),
        _ => None,
    };

    Ok(Json(UploadResponse {
        message: "success".to_string(),
        session_id: manager.public_session_id(&internal_id),
        files: uploaded,
        filename,
    }))
}

/// List the files in a session workspace
pub async fn list_files(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let internal_id = state.manager.resolve_session_id(&session_id);
    let files = state.manager.list_files(&internal_id).await?;
    Ok(Json(json!({ "files": files })))
}

/// Download a file by session id and file id (or filename)
pub async fn download_file(
    State(state): State<AppState>,
    Path((session_id, file_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    download(&state, &session_id, &file_id).await
}

/// Download a file addressed by query parameters
pub async fn download_by_query(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    download(&state, &query.session_id, &query.filename).await
}

async fn download(
    state: &AppState,
    session_ref: &str,
    file_ref: &str,
) -> Result<Response, AppError> {
    let internal_id = state.manager.resolve_session_id(session_ref);
    let filename = state.manager.resolve_file(&internal_id, file_ref)?;
    let content = state.manager.download(&internal_id, &filename).await?;

    info!(session_id = %internal_id, "Serving {} ({} bytes)", filename, content.len());
    Ok(attachment(&filename, content))
}

fn attachment(filename: &str, content: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', "_"));
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response()
}

/// Liveness probe
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "mode": "docker-sandboxed" }))
}
