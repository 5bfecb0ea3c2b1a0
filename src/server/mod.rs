
use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::chat::{ChatRequest, ChatScope, StreamCoordinator, TurnEvent};
use crate::config::Config;
use crate::database::lancedb::vector_store::VectorStore;
use crate::database::sqlite::Database;
use crate::indexer::TranscriptIndexer;
use crate::transcript::TranscriptSegment;
use crate::{LecternError, Result};

/// Shared handles injected into every request handler.
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub vector_store: Arc<Mutex<VectorStore>>,
    pub indexer: Arc<TranscriptIndexer>,
    pub coordinator: StreamCoordinator,
}

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/lectures/{id}/transcript", post(update_transcript))
        .route("/lectures/{id}/chat", post(lecture_chat))
        .route("/courses/{id}/chat", post(course_chat))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(config: &Config, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "HTTP server listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| LecternError::Other(anyhow::anyhow!("server error: {e}")))
}

/// HTTP projection of [`LecternError`].
pub struct ApiError(LecternError);

impl From<LecternError> for ApiError {
    fn from(err: LecternError) -> Self {
        Self(err)
    }
}

pub(crate) fn status_for(err: &LecternError) -> StatusCode {
    match err {
        LecternError::Validation(_) => StatusCode::BAD_REQUEST,
        LecternError::Authorization(_) => StatusCode::FORBIDDEN,
        LecternError::NotFound(_) => StatusCode::NOT_FOUND,
        LecternError::Upstream(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

fn caller_id(headers: &HeaderMap) -> Result<String> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| LecternError::Validation("missing x-user-id header".to_string()))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct TranscriptUpdateRequest {
    transcript: Vec<TranscriptSegment>,
}

#[derive(Debug, Serialize)]
struct TranscriptUpdateResponse {
    segments: usize,
    chunks_embedded: usize,
    deferred: bool,
    full_reindex: bool,
}

async fn update_transcript(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<TranscriptUpdateRequest>,
) -> std::result::Result<Json<TranscriptUpdateResponse>, ApiError> {
    let user_id = caller_id(&headers)?;
    let lecture = state
        .database
        .get_lecture(&lecture_id)
        .await?
        .ok_or_else(|| LecternError::NotFound(format!("lecture {lecture_id}")))?;
    if lecture.owner_id != user_id {
        return Err(
            LecternError::Authorization("caller does not own this lecture".to_string()).into(),
        );
    }

    let outcome = state
        .indexer
        .apply_transcript_update(&lecture, request.transcript)
        .await?;

    Ok(Json(TranscriptUpdateResponse {
        segments: outcome.segments_total,
        chunks_embedded: outcome.chunks_embedded,
        deferred: outcome.deferred,
        full_reindex: outcome.full_reindex,
    }))
}

async fn lecture_chat(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> std::result::Result<Response, ApiError> {
    let user_id = caller_id(&headers)?;
    let lecture = state
        .database
        .get_lecture(&lecture_id)
        .await?
        .ok_or_else(|| LecternError::NotFound(format!("lecture {lecture_id}")))?;

    let prepared = state
        .coordinator
        .prepare_turn(&user_id, ChatScope::Lecture(lecture), request)
        .await?;
    Ok(turn_sse(&state.coordinator, prepared))
}

async fn course_chat(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> std::result::Result<Response, ApiError> {
    let user_id = caller_id(&headers)?;
    let course = state
        .database
        .get_course(&course_id)
        .await?
        .ok_or_else(|| LecternError::NotFound(format!("course {course_id}")))?;

    let prepared = state
        .coordinator
        .prepare_turn(&user_id, ChatScope::Course(course), request)
        .await?;
    Ok(turn_sse(&state.coordinator, prepared))
}

fn turn_sse(coordinator: &StreamCoordinator, prepared: crate::chat::PreparedTurn) -> Response {
    let events = coordinator
        .stream_turn(prepared)
        .map(|event| Ok::<_, Infallible>(sse_event(&event)));
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

pub(crate) fn sse_event(event: &TurnEvent) -> Event {
    match event {
        TurnEvent::Delta(text) => Event::default()
            .event("delta")
            .data(serde_json::json!({ "text": text }).to_string()),
        TurnEvent::Reasoning(text) => Event::default()
            .event("reasoning")
            .data(serde_json::json!({ "text": text }).to_string()),
        TurnEvent::ToolCall { name, arguments } => Event::default()
            .event("tool_call")
            .data(serde_json::json!({ "name": name, "arguments": arguments }).to_string()),
        TurnEvent::Done {
            message_id,
            context_tokens,
        } => Event::default().event("done").data(
            serde_json::json!({ "message_id": message_id, "context_tokens": context_tokens })
                .to_string(),
        ),
        TurnEvent::Error(message) => Event::default()
            .event("error")
            .data(serde_json::json!({ "message": message }).to_string()),
    }
}
