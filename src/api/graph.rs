//! Raw graph routes.
//!
//! Routes:
//! - GET    /memories - List the caller's memories
//! - GET    /memories/:id - Get one memory
//! - DELETE /memories/:id - Tombstone a memory
//! - GET    /memories/:id/edges - Edges touching a node
//! - POST   /edges - Connect two memories

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::db;
use crate::models::{EdgeDirection, Memory, MemoryEdge, MemoryKind, Relation};
use crate::{AppState, Result};

use super::actor;

/// Build graph routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/memories", get(list_memories))
        .route("/memories/:memory_id", get(get_memory).delete(delete_memory))
        .route("/memories/:memory_id/edges", get(list_node_edges))
        .route("/edges", post(create_edge))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ListMemoriesQuery {
    pub kind: Option<String>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct ListEdgesQuery {
    pub direction: Option<EdgeDirection>,
    pub relation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEdgeRequest {
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
    pub strength: Option<f64>,
    pub confidence: Option<f64>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_memories(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListMemoriesQuery>,
) -> Result<Json<Vec<Memory>>> {
    let owner = actor(&headers)?;
    let kind = query.kind.as_deref().map(MemoryKind::from_str);
    let memories = db::list_memories(
        &state.db,
        &owner,
        kind.as_ref(),
        query.limit.clamp(1, 1000),
        query.offset.max(0),
    )
    .await?;
    Ok(Json(memories))
}

async fn get_memory(
    State(state): State<AppState>,
    Path(memory_id): Path<String>,
) -> Result<Json<Memory>> {
    let memory = db::get_memory(&state.db, &memory_id).await?;
    Ok(Json(memory))
}

async fn delete_memory(
    State(state): State<AppState>,
    Path(memory_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let owner = actor(&headers)?;
    state.graph.tombstone(&owner, &memory_id).await?;
    Ok(Json(serde_json::json!({ "deleted": memory_id })))
}

async fn list_node_edges(
    State(state): State<AppState>,
    Path(memory_id): Path<String>,
    Query(query): Query<ListEdgesQuery>,
) -> Result<Json<Vec<MemoryEdge>>> {
    let direction = query.direction.unwrap_or(EdgeDirection::Outgoing);
    let relation = query.relation.as_deref().map(Relation::from_str);
    let edges = db::list_edges(&state.db, &memory_id, direction, relation.as_ref()).await?;
    Ok(Json(edges))
}

async fn create_edge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateEdgeRequest>,
) -> Result<Json<MemoryEdge>> {
    let owner = actor(&headers)?;
    let edge = state
        .graph
        .connect(
            &owner,
            &req.source_id,
            &req.target_id,
            Relation::from_str(&req.relation),
            req.strength,
            req.confidence,
        )
        .await?;
    Ok(Json(edge))
}
