//! Chat session routes.
//!
//! Routes:
//! - GET  /sessions - List the caller's sessions
//! - POST /sessions - Create a session (optionally as a fork)
//! - POST /sessions/:id/fork - Fork a session at an optional cutoff
//! - GET  /sessions/:id/history - Materialized conversation, ?peek=true
//!   appends the live open turn
//! - POST /sessions/:id/messages - Direct history append
//! - POST /sessions/:id/partials - Streamed fragment append

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Memory, MessageMeta, Role, ToolCall};
use crate::{AppState, Error, Result};

use super::actor;

/// Build session routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/:session_id/fork", post(fork_session))
        .route("/:session_id/history", get(get_history))
        .route("/:session_id/messages", post(append_message))
        .route("/:session_id/partials", post(append_partial))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub title: String,
    pub forked_from: Option<String>,
    pub forked_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForkSessionRequest {
    pub forked_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub role: String,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub thinking: Option<String>,
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AppendPartialRequest {
    pub role: String,
    pub content: String,
    pub seq: i64,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    /// Include the live, not-yet-consolidated open turn.
    #[serde(default)]
    pub peek: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub forked_from: Option<String>,
    pub forked_at: Option<String>,
    pub created_at: String,
}

impl From<Memory> for SessionSummary {
    fn from(m: Memory) -> Self {
        let meta = m.meta();
        Self {
            id: m.id,
            title: m.content,
            forked_from: meta.forked_from,
            forked_at: meta.forked_at,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct ForkResponse {
    pub id: String,
    pub forked_at: Option<String>,
}

fn parse_role(role: &str) -> Result<Role> {
    Role::from_str(role).ok_or_else(|| Error::Validation(format!("unknown role: {}", role)))
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummary>>> {
    let owner = actor(&headers)?;
    let sessions = state.graph.list_sessions(&owner).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreatedResponse>> {
    let owner = actor(&headers)?;
    let session = state
        .graph
        .create_session(
            &owner,
            &req.title,
            req.forked_from.as_deref(),
            req.forked_at.as_deref(),
        )
        .await?;
    Ok(Json(CreatedResponse { id: session.id }))
}

async fn fork_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ForkSessionRequest>,
) -> Result<Json<ForkResponse>> {
    let owner = actor(&headers)?;
    let fork = state
        .graph
        .fork_session(&session_id, &owner, req.forked_at.as_deref())
        .await?;
    let forked_at = fork.meta().forked_at;
    Ok(Json(ForkResponse {
        id: fork.id,
        forked_at,
    }))
}

async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>> {
    let mut history = state.resolver.materialize_history(&session_id).await?;

    if query.peek {
        history.extend(state.resolver.peek_open_turn(&session_id).await?);
    }

    Ok(Json(history))
}

async fn append_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AppendMessageRequest>,
) -> Result<Json<CreatedResponse>> {
    let owner = actor(&headers)?;
    let role = parse_role(&req.role)?;

    let meta = MessageMeta {
        tool_name: req.tool_name,
        tool_calls: req.tool_calls,
        thinking: req.thinking,
        images: req.images,
        ..Default::default()
    };

    let message = state
        .graph
        .append_history(&session_id, &owner, role, &req.content, meta)
        .await?;
    Ok(Json(CreatedResponse { id: message.id }))
}

async fn append_partial(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AppendPartialRequest>,
) -> Result<Json<CreatedResponse>> {
    let owner = actor(&headers)?;
    let role = parse_role(&req.role)?;

    let fragment = state
        .graph
        .append_partial(&session_id, &owner, role, &req.content, req.seq, req.done)
        .await?;
    Ok(Json(CreatedResponse { id: fragment.id }))
}
