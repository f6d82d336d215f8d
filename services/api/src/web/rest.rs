//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::engine::UploadedFile;
use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use study_assistant_core::domain::{
    ArtifactKind, ChatTurn, DocumentRecord, IngestStatus, IngestedFile, Session, SessionKey,
};
use study_assistant_core::ports::PortError;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        create_session_handler,
        list_sessions_handler,
        get_session_handler,
        rename_session_handler,
        delete_session_handler,
        upload_documents_handler,
        remove_document_handler,
        chat_handler,
        generate_notes_handler,
        generate_practice_test_handler,
        download_artifact_handler,
    ),
    components(
        schemas(
            CreateSessionRequest,
            RenameSessionRequest,
            AskRequest,
            SessionView,
            SessionSummary,
            SessionListResponse,
            DocumentView,
            ChatTurnView,
            UploadResponse,
            IngestedFileView,
            ArtifactResponse,
            MessageResponse,
        )
    ),
    tags(
        (name = "Study Assistant API", description = "Document Q&A sessions with retrieval-augmented answering and study artifacts.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    pub user_id: String,
    #[serde(default)]
    pub session_name: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct RenameSessionRequest {
    pub session_name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct AskRequest {
    pub question: String,
}

/// A full session: metadata, document manifest and chat history.
#[derive(Serialize, ToSchema)]
pub struct SessionView {
    pub session_id: Uuid,
    pub user_id: String,
    pub session_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub documents: Vec<DocumentView>,
    pub chat_history: Vec<ChatTurnView>,
}

impl SessionView {
    fn from_domain(session: Session) -> Self {
        Self {
            session_id: session.key.session_id,
            user_id: session.key.user_id,
            session_name: session.name,
            created_at: session.created_at,
            updated_at: session.updated_at,
            message_count: session.message_count,
            documents: session.documents.into_iter().map(DocumentView::from_domain).collect(),
            chat_history: session.history.into_iter().map(ChatTurnView::from_domain).collect(),
        }
    }
}

/// The abbreviated listing entry for a user's session overview.
#[derive(Serialize, ToSchema)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub session_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub document_count: usize,
}

impl SessionSummary {
    fn from_domain(session: &Session) -> Self {
        Self {
            session_id: session.key.session_id,
            session_name: session.name.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            message_count: session.message_count,
            document_count: session.documents.len(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionListResponse {
    pub user_id: String,
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

#[derive(Serialize, ToSchema)]
pub struct DocumentView {
    pub id: Uuid,
    pub filename: String,
    pub kind: String,
    pub uploaded_at: DateTime<Utc>,
}

impl DocumentView {
    fn from_domain(doc: DocumentRecord) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename,
            kind: doc.kind.as_str().to_string(),
            uploaded_at: doc.uploaded_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ChatTurnView {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurnView {
    fn from_domain(turn: ChatTurn) -> Self {
        Self {
            question: turn.question,
            answer: turn.answer,
            timestamp: turn.timestamp,
        }
    }
}

/// Per-file ingestion outcome; the batch succeeds partially by design.
#[derive(Serialize, ToSchema)]
pub struct IngestedFileView {
    pub filename: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestedFileView {
    fn from_domain(file: IngestedFile) -> Self {
        match file.status {
            IngestStatus::Indexed(record) => Self {
                filename: file.filename,
                status: "indexed".to_string(),
                document: Some(DocumentView::from_domain(record)),
                error: None,
            },
            IngestStatus::Failed(reason) => Self {
                filename: file.filename,
                status: "failed".to_string(),
                document: None,
                error: Some(reason),
            },
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub files: Vec<IngestedFileView>,
    pub indexed: usize,
    pub failed: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ArtifactResponse {
    pub filename: String,
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

type HandlerError = (StatusCode, String);

fn into_handler_error(e: PortError) -> HandlerError {
    let status = match &e {
        PortError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::EmptySession => StatusCode::CONFLICT,
        PortError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PortError::EmbeddingUnavailable(_) | PortError::GenerationUnavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
        PortError::Storage(_) | PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", e);
    }
    (status, e.to_string())
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = MessageResponse))
)]
pub async fn health_handler() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "healthy".to_string(),
    })
}

/// Create a new chat session for a user.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created successfully", body = SessionView),
        (status = 400, description = "Missing or invalid user_id")
    )
)]
pub async fn create_session_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let session = app_state
        .engine
        .create_session(&payload.user_id, payload.session_name.as_deref().unwrap_or(""))
        .await
        .map_err(into_handler_error)?;
    Ok((StatusCode::CREATED, Json(SessionView::from_domain(session))))
}

/// List all sessions for a user, most recently updated first.
#[utoipa::path(
    get,
    path = "/sessions/{user_id}",
    params(("user_id" = String, Path, description = "The user to list sessions for")),
    responses((status = 200, description = "Sessions for the user", body = SessionListResponse))
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionListResponse>, HandlerError> {
    let sessions = app_state
        .engine
        .list_sessions(&user_id)
        .await
        .map_err(into_handler_error)?;
    let summaries: Vec<SessionSummary> = sessions.iter().map(SessionSummary::from_domain).collect();
    Ok(Json(SessionListResponse {
        user_id,
        count: summaries.len(),
        sessions: summaries,
    }))
}

/// Get one session with its full history and document manifest.
#[utoipa::path(
    get,
    path = "/sessions/{user_id}/{session_id}",
    params(
        ("user_id" = String, Path, description = "The session's owner"),
        ("session_id" = Uuid, Path, description = "The session to fetch")
    ),
    responses(
        (status = 200, description = "The session", body = SessionView),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, Uuid)>,
) -> Result<Json<SessionView>, HandlerError> {
    let key = SessionKey::new(user_id, session_id);
    let session = app_state
        .engine
        .get_session(&key)
        .await
        .map_err(into_handler_error)?;
    Ok(Json(SessionView::from_domain(session)))
}

/// Rename a session.
#[utoipa::path(
    put,
    path = "/sessions/{user_id}/{session_id}",
    request_body = RenameSessionRequest,
    params(
        ("user_id" = String, Path, description = "The session's owner"),
        ("session_id" = Uuid, Path, description = "The session to rename")
    ),
    responses(
        (status = 200, description = "Session renamed", body = SessionView),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn rename_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, Uuid)>,
    Json(payload): Json<RenameSessionRequest>,
) -> Result<Json<SessionView>, HandlerError> {
    let key = SessionKey::new(user_id, session_id);
    let session = app_state
        .engine
        .rename_session(&key, &payload.session_name)
        .await
        .map_err(into_handler_error)?;
    Ok(Json(SessionView::from_domain(session)))
}

/// Delete a session and all associated data (metadata, index, artifacts).
#[utoipa::path(
    delete,
    path = "/sessions/{user_id}/{session_id}",
    params(
        ("user_id" = String, Path, description = "The session's owner"),
        ("session_id" = Uuid, Path, description = "The session to delete")
    ),
    responses(
        (status = 200, description = "Session deleted", body = MessageResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn delete_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, Uuid)>,
) -> Result<Json<MessageResponse>, HandlerError> {
    let key = SessionKey::new(user_id, session_id);
    app_state
        .engine
        .delete_session(&key)
        .await
        .map_err(into_handler_error)?;
    Ok(Json(MessageResponse {
        message: "Session deleted successfully".to_string(),
    }))
}

/// Upload documents into a session (multipart, multiple files).
///
/// Each file is processed independently; the response reports per-file
/// success or failure so partial uploads are visible to the client.
#[utoipa::path(
    post,
    path = "/sessions/{user_id}/{session_id}/documents",
    request_body(content_type = "multipart/form-data", description = "The documents to upload"),
    params(
        ("user_id" = String, Path, description = "The session's owner"),
        ("session_id" = Uuid, Path, description = "The session to upload into")
    ),
    responses(
        (status = 200, description = "Per-file ingestion report", body = UploadResponse),
        (status = 400, description = "No files provided"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn upload_documents_handler(
    State(app_state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, Uuid)>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, HandlerError> {
    let key = SessionKey::new(user_id, session_id);

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read multipart data: {}", e)))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file bytes: {}", e)))?;
        files.push(UploadedFile { filename, data });
    }

    let report = app_state
        .engine
        .ingest(&key, files)
        .await
        .map_err(into_handler_error)?;

    let files: Vec<IngestedFileView> =
        report.into_iter().map(IngestedFileView::from_domain).collect();
    let indexed = files.iter().filter(|f| f.status == "indexed").count();
    Ok(Json(UploadResponse {
        failed: files.len() - indexed,
        indexed,
        files,
    }))
}

/// Remove one document from a session; its chunks leave the index.
#[utoipa::path(
    delete,
    path = "/sessions/{user_id}/{session_id}/documents/{document_id}",
    params(
        ("user_id" = String, Path, description = "The session's owner"),
        ("session_id" = Uuid, Path, description = "The session"),
        ("document_id" = Uuid, Path, description = "The document to remove")
    ),
    responses(
        (status = 200, description = "Updated session", body = SessionView),
        (status = 404, description = "Unknown session or document")
    )
)]
pub async fn remove_document_handler(
    State(app_state): State<Arc<AppState>>,
    Path((user_id, session_id, document_id)): Path<(String, Uuid, Uuid)>,
) -> Result<Json<SessionView>, HandlerError> {
    let key = SessionKey::new(user_id, session_id);
    let session = app_state
        .engine
        .remove_document(&key, document_id)
        .await
        .map_err(into_handler_error)?;
    Ok(Json(SessionView::from_domain(session)))
}

/// Ask a question against a session's documents.
#[utoipa::path(
    post,
    path = "/sessions/{user_id}/{session_id}/chat",
    request_body = AskRequest,
    params(
        ("user_id" = String, Path, description = "The session's owner"),
        ("session_id" = Uuid, Path, description = "The session to query")
    ),
    responses(
        (status = 200, description = "The new chat turn", body = ChatTurnView),
        (status = 400, description = "Blank question"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, Uuid)>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<ChatTurnView>, HandlerError> {
    let key = SessionKey::new(user_id, session_id);
    let turn = app_state
        .engine
        .ask(&key, &payload.question)
        .await
        .map_err(into_handler_error)?;
    Ok(Json(ChatTurnView::from_domain(turn)))
}

/// Generate condensed study notes from a session's documents.
#[utoipa::path(
    post,
    path = "/sessions/{user_id}/{session_id}/notes",
    params(
        ("user_id" = String, Path, description = "The session's owner"),
        ("session_id" = Uuid, Path, description = "The session to summarize")
    ),
    responses(
        (status = 200, description = "Rendered notes reference", body = ArtifactResponse),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session has no documents")
    )
)]
pub async fn generate_notes_handler(
    State(app_state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, Uuid)>,
) -> Result<Json<ArtifactResponse>, HandlerError> {
    generate_artifact(app_state, user_id, session_id, ArtifactKind::Notes).await
}

/// Generate a practice test from a session's documents.
#[utoipa::path(
    post,
    path = "/sessions/{user_id}/{session_id}/practice-test",
    params(
        ("user_id" = String, Path, description = "The session's owner"),
        ("session_id" = Uuid, Path, description = "The session to test on")
    ),
    responses(
        (status = 200, description = "Rendered practice test reference", body = ArtifactResponse),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session has no documents")
    )
)]
pub async fn generate_practice_test_handler(
    State(app_state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, Uuid)>,
) -> Result<Json<ArtifactResponse>, HandlerError> {
    generate_artifact(app_state, user_id, session_id, ArtifactKind::PracticeTest).await
}

async fn generate_artifact(
    app_state: Arc<AppState>,
    user_id: String,
    session_id: Uuid,
    kind: ArtifactKind,
) -> Result<Json<ArtifactResponse>, HandlerError> {
    let key = SessionKey::new(user_id, session_id);
    let filename = app_state
        .engine
        .generate_artifact(&key, kind)
        .await
        .map_err(into_handler_error)?;
    Ok(Json(ArtifactResponse { filename }))
}

/// Download a previously rendered artifact.
#[utoipa::path(
    get,
    path = "/sessions/{user_id}/{session_id}/artifacts/{filename}",
    params(
        ("user_id" = String, Path, description = "The session's owner"),
        ("session_id" = Uuid, Path, description = "The session"),
        ("filename" = String, Path, description = "The artifact filename returned at generation time")
    ),
    responses(
        (status = 200, description = "The rendered document"),
        (status = 404, description = "Unknown session or artifact")
    )
)]
pub async fn download_artifact_handler(
    State(app_state): State<Arc<AppState>>,
    Path((user_id, session_id, filename)): Path<(String, Uuid, String)>,
) -> Result<impl IntoResponse, HandlerError> {
    let key = SessionKey::new(user_id, session_id);
    let path = app_state
        .engine
        .artifact_path(&key, &filename)
        .await
        .map_err(into_handler_error)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    ))
}
