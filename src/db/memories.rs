//! Memory node queries.
//!
//! CRUD over the memories table with tombstone semantics, plus the
//! session-scoped message queries used by the resolver and the
//! consolidation engine.

use sqlx::SqliteConnection;

use crate::models::{now_rfc3339, Memory, MemoryKind, MessageMeta, Relation};
use crate::{Error, Result};

use super::{enqueue_tx, insert_edge, record_audit, CreateEdge, DbPool};

/// Input for creating a new memory node.
#[derive(Debug, Clone)]
pub struct CreateMemory {
    pub id: String,
    pub kind: MemoryKind,
    /// History and partial nodes require content; the empty string is
    /// allowed, absence is not.
    pub content: Option<String>,
    pub metadata: MessageMeta,
    pub created_by: String,
}

/// Input for appending a message to a session.
///
/// The node and its `belongs_to` edge commit in one transaction; partial
/// appends also enqueue a consolidation job in that transaction.
#[derive(Debug, Clone)]
pub struct AppendMessage {
    pub id: String,
    pub session_id: String,
    pub kind: MemoryKind,
    pub content: String,
    pub metadata: MessageMeta,
    pub created_by: String,
}

/// Outcome of a partial-group promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// The anchor became a history node and its predecessors were tombstoned.
    Promoted,
    /// The anchor was already finalized; nothing was mutated.
    AlreadyFinal,
}

fn validate_node(kind: &MemoryKind, content: &Option<String>, meta: &MessageMeta) -> Result<()> {
    if kind.is_message() {
        if content.is_none() {
            return Err(Error::Validation(format!(
                "{} nodes require content",
                kind.as_str()
            )));
        }
        if meta.role.is_none() {
            return Err(Error::Validation(format!(
                "{} nodes require a role",
                kind.as_str()
            )));
        }
    }
    Ok(())
}

/// Insert a node inside an existing transaction.
pub(crate) async fn insert_memory(
    conn: &mut SqliteConnection,
    input: &CreateMemory,
) -> Result<Memory> {
    validate_node(&input.kind, &input.content, &input.metadata)?;

    let now = now_rfc3339();
    let memory = sqlx::query_as::<_, Memory>(
        r#"
        INSERT INTO memories (
            id, kind, content, metadata, created_by, updated_by,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&input.id)
    .bind(input.kind.as_str())
    .bind(input.content.clone().unwrap_or_default())
    .bind(input.metadata.to_json())
    .bind(&input.created_by)
    .bind(&input.created_by)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *conn)
    .await?;

    record_audit(
        conn,
        &input.created_by,
        "memory.create",
        &memory.id,
        None,
        Some(&memory.content),
    )
    .await?;

    Ok(memory)
}

/// Create a memory node.
pub async fn create_memory(pool: &DbPool, input: CreateMemory) -> Result<Memory> {
    let mut tx = pool.begin().await?;
    let memory = insert_memory(&mut tx, &input).await?;
    tx.commit().await?;
    Ok(memory)
}

/// Get a live memory by id. Tombstoned rows are not found.
pub async fn get_memory(pool: &DbPool, id: &str) -> Result<Memory> {
    sqlx::query_as::<_, Memory>("SELECT * FROM memories WHERE id = ? AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("memory not found: {}", id)))
}

/// Get a memory by id including tombstoned rows (audit/debug paths).
pub async fn get_memory_any(pool: &DbPool, id: &str) -> Result<Option<Memory>> {
    sqlx::query_as::<_, Memory>("SELECT * FROM memories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(Error::Database)
}

/// Soft-delete a memory. Tombstoning an already-tombstoned node is a no-op.
pub async fn tombstone_memory(pool: &DbPool, id: &str, actor: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    let now = now_rfc3339();

    let result = sqlx::query(
        r#"
        UPDATE memories
        SET deleted_at = ?, updated_by = ?, updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(&now)
    .bind(actor)
    .bind(&now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() > 0 {
        record_audit(&mut tx, actor, "memory.tombstone", id, None, None).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// List live memories for an owner, newest first.
pub async fn list_memories(
    pool: &DbPool,
    owner: &str,
    kind: Option<&MemoryKind>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Memory>> {
    let memories = match kind {
        Some(kind) => {
            sqlx::query_as::<_, Memory>(
                r#"
                SELECT * FROM memories
                WHERE created_by = ? AND kind = ? AND deleted_at IS NULL
                ORDER BY id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(owner)
            .bind(kind.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Memory>(
                r#"
                SELECT * FROM memories
                WHERE created_by = ? AND deleted_at IS NULL
                ORDER BY id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(owner)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(memories)
}

/// Fetch the live history messages of one session in creation order,
/// optionally cut off at an inclusive boundary id.
///
/// Ids are UUIDv7, so id order is creation order and the cutoff is a
/// plain comparison.
pub async fn session_messages(
    pool: &DbPool,
    session_id: &str,
    cutoff: Option<&str>,
) -> Result<Vec<Memory>> {
    let messages = match cutoff {
        Some(cutoff) => {
            sqlx::query_as::<_, Memory>(
                r#"
                SELECT m.* FROM memories m
                JOIN memory_edges e ON e.source_id = m.id AND e.relation = 'belongs_to'
                WHERE e.target_id = ? AND m.kind = 'history'
                  AND m.deleted_at IS NULL AND m.id <= ?
                ORDER BY m.id ASC
                "#,
            )
            .bind(session_id)
            .bind(cutoff)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Memory>(
                r#"
                SELECT m.* FROM memories m
                JOIN memory_edges e ON e.source_id = m.id AND e.relation = 'belongs_to'
                WHERE e.target_id = ? AND m.kind = 'history'
                  AND m.deleted_at IS NULL
                ORDER BY m.id ASC
                "#,
            )
            .bind(session_id)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(messages)
}

/// The id of the most recent live message in a session, if any.
/// Used to default the fork cutoff.
pub async fn latest_message_id(pool: &DbPool, session_id: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT m.id FROM memories m
        JOIN memory_edges e ON e.source_id = m.id AND e.relation = 'belongs_to'
        WHERE e.target_id = ? AND m.kind IN ('history', 'partial')
          AND m.deleted_at IS NULL
        ORDER BY m.id DESC
        LIMIT 1
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id,)| id))
}

/// Fetch the live partial fragments of a session, ordered by seq
/// ascending with id as tiebreaker. This ordering is what makes
/// consolidation grouping deterministic across re-runs.
pub async fn active_partials(pool: &DbPool, session_id: &str) -> Result<Vec<Memory>> {
    sqlx::query_as::<_, Memory>(
        r#"
        SELECT m.* FROM memories m
        JOIN memory_edges e ON e.source_id = m.id AND e.relation = 'belongs_to'
        WHERE e.target_id = ? AND m.kind = 'partial'
          AND m.deleted_at IS NULL
        ORDER BY COALESCE(json_extract(m.metadata, '$.seq'), 0) ASC, m.id ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .map_err(Error::Database)
}

/// Append a message node to a session: node, membership edge and (for
/// partials) the consolidation job commit together or not at all.
pub async fn append_message(pool: &DbPool, input: AppendMessage) -> Result<Memory> {
    if !input.kind.is_message() {
        return Err(Error::Validation(format!(
            "cannot append {} as a message",
            input.kind.as_str()
        )));
    }

    let mut tx = pool.begin().await?;

    let memory = insert_memory(
        &mut tx,
        &CreateMemory {
            id: input.id.clone(),
            kind: input.kind.clone(),
            content: Some(input.content.clone()),
            metadata: input.metadata.clone(),
            created_by: input.created_by.clone(),
        },
    )
    .await?;

    insert_edge(
        &mut tx,
        &CreateEdge::new(
            &memory.id,
            &input.session_id,
            Relation::BelongsTo,
            &input.created_by,
        ),
    )
    .await?;

    if input.kind == MemoryKind::Partial {
        enqueue_tx(&mut tx, &memory.id).await?;
    }

    tx.commit().await?;
    Ok(memory)
}

/// Finalize one consolidation group: promote the anchor from partial to
/// history with the merged content, then tombstone the other fragments.
///
/// The whole group commits in one transaction; the promote runs first so
/// the non-transactional reading of the sequence is still safe. Re-running
/// on an already-finalized anchor is a detected no-op.
pub async fn promote_partial_group(
    pool: &DbPool,
    anchor_id: &str,
    merged_content: &str,
    predecessor_ids: &[String],
    actor: &str,
) -> Result<PromoteOutcome> {
    let mut tx = pool.begin().await?;
    let now = now_rfc3339();

    let promoted = sqlx::query(
        r#"
        UPDATE memories
        SET kind = 'history', content = ?, updated_by = ?, updated_at = ?
        WHERE id = ? AND kind = 'partial' AND deleted_at IS NULL
        "#,
    )
    .bind(merged_content)
    .bind(actor)
    .bind(&now)
    .bind(anchor_id)
    .execute(&mut *tx)
    .await?;

    if promoted.rows_affected() == 0 {
        let existing =
            sqlx::query_as::<_, Memory>("SELECT * FROM memories WHERE id = ?")
                .bind(anchor_id)
                .fetch_optional(&mut *tx)
                .await?;

        return match existing {
            Some(m) if m.kind_enum() == MemoryKind::History && !m.is_deleted() => {
                Ok(PromoteOutcome::AlreadyFinal)
            }
            _ => Err(Error::DataIntegrity(format!(
                "consolidation anchor missing or unusable: {}",
                anchor_id
            ))),
        };
    }

    record_audit(
        &mut tx,
        actor,
        "memory.promote",
        anchor_id,
        Some("partial"),
        Some("history"),
    )
    .await?;

    for id in predecessor_ids {
        sqlx::query(
            r#"
            UPDATE memories
            SET deleted_at = ?, updated_by = ?, updated_at = ?
            WHERE id = ? AND kind = 'partial' AND deleted_at IS NULL
            "#,
        )
        .bind(&now)
        .bind(actor)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        record_audit(&mut tx, actor, "memory.tombstone", id, None, None).await?;
    }

    tx.commit().await?;
    Ok(PromoteOutcome::Promoted)
}
