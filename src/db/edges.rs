//! Memory edge queries.
//!
//! Edges are directed, typed relations between memories. The
//! (source_id, target_id, relation) triple is unique and edge creation
//! is an idempotent upsert on it.

use sqlx::SqliteConnection;

use crate::models::{new_id, now_rfc3339, EdgeDirection, MemoryEdge, MessageMeta, Relation};
use crate::{Error, Result};

use super::{record_audit, DbPool};

/// Input for creating a new edge.
#[derive(Debug, Clone)]
pub struct CreateEdge {
    pub source_id: String,
    pub target_id: String,
    pub relation: Relation,
    pub strength: Option<f64>,
    pub confidence: Option<f64>,
    pub metadata: MessageMeta,
    pub created_by: String,
}

impl CreateEdge {
    pub fn new(source_id: &str, target_id: &str, relation: Relation, created_by: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            relation,
            strength: None,
            confidence: None,
            metadata: MessageMeta::default(),
            created_by: created_by.to_string(),
        }
    }
}

/// Insert an edge inside an existing transaction.
///
/// Returns None when the unique triple already exists (the conflict is
/// swallowed; the caller re-reads if it needs the existing row).
pub(crate) async fn insert_edge(
    conn: &mut SqliteConnection,
    input: &CreateEdge,
) -> Result<Option<MemoryEdge>> {
    if input.source_id == input.target_id {
        return Err(Error::Validation(format!(
            "self-referential edge rejected: {}",
            input.source_id
        )));
    }

    let edge = sqlx::query_as::<_, MemoryEdge>(
        r#"
        INSERT INTO memory_edges (
            id, source_id, target_id, relation, strength, confidence,
            metadata, created_by, updated_by, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (source_id, target_id, relation) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(new_id())
    .bind(&input.source_id)
    .bind(&input.target_id)
    .bind(input.relation.as_str())
    .bind(input.strength)
    .bind(input.confidence)
    .bind(input.metadata.to_json())
    .bind(&input.created_by)
    .bind(&input.created_by)
    .bind(now_rfc3339())
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(ref edge) = edge {
        record_audit(
            conn,
            &input.created_by,
            "edge.create",
            &edge.id,
            None,
            Some(&format!(
                "{} -{}-> {}",
                edge.source_id, edge.relation, edge.target_id
            )),
        )
        .await?;
    }

    Ok(edge)
}

/// Create an edge. Re-creating an existing triple is a no-op that
/// returns the existing row.
pub async fn create_edge(pool: &DbPool, input: CreateEdge) -> Result<MemoryEdge> {
    let mut tx = pool.begin().await?;
    let inserted = insert_edge(&mut tx, &input).await?;
    tx.commit().await?;

    match inserted {
        Some(edge) => Ok(edge),
        None => get_edge_by_triple(pool, &input.source_id, &input.target_id, &input.relation)
            .await?
            .ok_or_else(|| {
                Error::Internal(format!(
                    "edge vanished during upsert: {} -> {}",
                    input.source_id, input.target_id
                ))
            }),
    }
}

/// Get an edge by its unique triple.
pub async fn get_edge_by_triple(
    pool: &DbPool,
    source_id: &str,
    target_id: &str,
    relation: &Relation,
) -> Result<Option<MemoryEdge>> {
    sqlx::query_as::<_, MemoryEdge>(
        r#"
        SELECT * FROM memory_edges
        WHERE source_id = ? AND target_id = ? AND relation = ?
        "#,
    )
    .bind(source_id)
    .bind(target_id)
    .bind(relation.as_str())
    .fetch_optional(pool)
    .await
    .map_err(Error::Database)
}

/// List edges touching a node in the given direction, optionally
/// filtered by relation.
pub async fn list_edges(
    pool: &DbPool,
    node_id: &str,
    direction: EdgeDirection,
    relation: Option<&Relation>,
) -> Result<Vec<MemoryEdge>> {
    let column = match direction {
        EdgeDirection::Outgoing => "source_id",
        EdgeDirection::Incoming => "target_id",
    };

    let edges = match relation {
        Some(rel) => {
            sqlx::query_as::<_, MemoryEdge>(&format!(
                "SELECT * FROM memory_edges WHERE {} = ? AND relation = ? ORDER BY created_at DESC",
                column
            ))
            .bind(node_id)
            .bind(rel.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, MemoryEdge>(&format!(
                "SELECT * FROM memory_edges WHERE {} = ? ORDER BY created_at DESC",
                column
            ))
            .bind(node_id)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(edges)
}

/// Resolve the session a message belongs to, if any.
pub async fn session_of(pool: &DbPool, memory_id: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT target_id FROM memory_edges
        WHERE relation = 'belongs_to' AND source_id = ?
        LIMIT 1
        "#,
    )
    .bind(memory_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id,)| id))
}
