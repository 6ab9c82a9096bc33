//! Session resolver.
//!
//! Produces the ordered, role-tagged message list for a session by
//! walking the fork lineage from the leaf back to the root, applying
//! each link's inclusive cutoff along the way. The output is what gets
//! submitted to a language model.

use std::collections::HashSet;

use tracing::warn;

use crate::db::{self, DbPool};
use crate::models::{ChatMessage, Memory, MemoryKind};
use crate::{Error, Result};

/// Service for reading conversations out of the graph.
#[derive(Clone)]
pub struct ResolverService {
    db: DbPool,
}

impl ResolverService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Materialize the full conversation history of a session,
    /// oldest-first, across its whole fork chain.
    ///
    /// Only finalized history nodes appear here; partial fragments are
    /// invisible until consolidation promotes them (`peek_open_turn` is
    /// the live view). Messages at the fork cutoff are included, messages
    /// created in a parent after its fork point are not.
    pub async fn materialize_history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let mut cursor = self.get_session(session_id).await?;
        let mut cutoff: Option<String> = None;
        let mut visited: HashSet<String> = HashSet::new();
        let mut history: Vec<ChatMessage> = Vec::new();

        loop {
            visited.insert(cursor.id.clone());

            let rows = db::session_messages(&self.db, &cursor.id, cutoff.as_deref()).await?;
            let mut segment = Vec::with_capacity(rows.len());
            for row in &rows {
                let msg = to_chat_message(row)?;
                if !msg.is_blank() {
                    segment.push(msg);
                }
            }

            // Accumulating leaf-to-root, so each parent segment goes in front.
            segment.extend(history);
            history = segment;

            let meta = cursor.meta();
            let parent_id = match meta.forked_from {
                Some(id) => id,
                None => break,
            };

            if visited.contains(&parent_id) {
                warn!(session_id, parent_id = %parent_id, "Fork cycle detected");
                return Err(Error::DataIntegrity(format!(
                    "fork cycle detected at session {}",
                    parent_id
                )));
            }

            cursor = match db::get_memory(&self.db, &parent_id).await {
                Ok(parent) => parent,
                Err(Error::NotFound(_)) => {
                    warn!(session_id, parent_id = %parent_id, "Fork parent missing");
                    return Err(Error::DataIntegrity(format!(
                        "fork parent missing: {}",
                        parent_id
                    )));
                }
                Err(e) => return Err(e),
            };
            cutoff = meta.forked_at;
        }

        Ok(history)
    }

    /// The live, not-yet-done trailing run of partial fragments.
    ///
    /// This is the streaming view of the current turn, distinct from
    /// history; a run that has already seen its `done` fragment is the
    /// consolidator's business, not ours.
    pub async fn peek_open_turn(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.get_session(session_id).await?;

        let partials = db::active_partials(&self.db, session_id).await?;

        let open_from = partials
            .iter()
            .rposition(|p| p.meta().done == Some(true))
            .map(|i| i + 1)
            .unwrap_or(0);

        let mut open = Vec::new();
        for row in &partials[open_from..] {
            let msg = to_chat_message(row)?;
            if !msg.is_blank() {
                open.push(msg);
            }
        }

        Ok(open)
    }

    /// Resolve the session that owns a message, if any.
    pub async fn session_of(&self, memory_id: &str) -> Result<Option<String>> {
        db::session_of(&self.db, memory_id).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Memory> {
        let session = db::get_memory(&self.db, session_id).await?;
        if session.kind_enum() != MemoryKind::Session {
            return Err(Error::NotFound(format!("not a session: {}", session_id)));
        }
        Ok(session)
    }
}

/// Reduce a message row to the minimum a context window needs.
/// Empty optional payloads are dropped rather than serialized.
fn to_chat_message(memory: &Memory) -> Result<ChatMessage> {
    let meta = memory.meta();
    let role = meta.role.ok_or_else(|| {
        Error::DataIntegrity(format!("message {} has no role", memory.id))
    })?;

    Ok(ChatMessage {
        role,
        content: memory.content.clone(),
        done: meta.done,
        images: meta.images.filter(|v| !v.is_empty()),
        tool_name: meta.tool_name.filter(|s| !s.is_empty()),
        tool_calls: meta.tool_calls.filter(|v| !v.is_empty()),
        thinking: meta.thinking.filter(|s| !s.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{initialize_schema, init_pool};
    use crate::models::{MessageMeta, Role};
    use crate::services::GraphService;

    async fn setup() -> (GraphService, ResolverService) {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        (GraphService::new(pool.clone()), ResolverService::new(pool))
    }

    fn roles(history: &[ChatMessage]) -> Vec<(Role, &str)> {
        history
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn test_linear_history() {
        let (graph, resolver) = setup().await;

        let s1 = graph.create_session("u1", "chat", None, None).await.unwrap();
        graph
            .append_history(&s1.id, "u1", Role::User, "Hi", MessageMeta::default())
            .await
            .unwrap();
        graph
            .append_history(&s1.id, "u1", Role::Assistant, "Hello!", MessageMeta::default())
            .await
            .unwrap();

        let history = resolver.materialize_history(&s1.id).await.unwrap();
        assert_eq!(
            roles(&history),
            vec![(Role::User, "Hi"), (Role::Assistant, "Hello!")]
        );
    }

    #[tokio::test]
    async fn test_fork_cutoff_is_inclusive() {
        let (graph, resolver) = setup().await;

        let s1 = graph.create_session("u1", "chat", None, None).await.unwrap();
        let m1 = graph
            .append_history(&s1.id, "u1", Role::User, "Hi", MessageMeta::default())
            .await
            .unwrap();
        graph
            .append_history(&s1.id, "u1", Role::Assistant, "Hello!", MessageMeta::default())
            .await
            .unwrap();

        let s2 = graph.fork_session(&s1.id, "u1", Some(&m1.id)).await.unwrap();
        graph
            .append_history(&s2.id, "u1", Role::User, "New branch", MessageMeta::default())
            .await
            .unwrap();
        // Appended to the parent after the fork; invisible through s2.
        graph
            .append_history(&s1.id, "u1", Role::Assistant, "Ignored", MessageMeta::default())
            .await
            .unwrap();

        let history = resolver.materialize_history(&s2.id).await.unwrap();
        assert_eq!(
            roles(&history),
            vec![(Role::User, "Hi"), (Role::User, "New branch")]
        );
    }

    #[tokio::test]
    async fn test_fork_of_fork_walks_to_root() {
        let (graph, resolver) = setup().await;

        let s1 = graph.create_session("u1", "root", None, None).await.unwrap();
        graph
            .append_history(&s1.id, "u1", Role::User, "a", MessageMeta::default())
            .await
            .unwrap();
        let s2 = graph.fork_session(&s1.id, "u1", None).await.unwrap();
        graph
            .append_history(&s2.id, "u1", Role::User, "b", MessageMeta::default())
            .await
            .unwrap();
        let s3 = graph.fork_session(&s2.id, "u1", None).await.unwrap();
        graph
            .append_history(&s3.id, "u1", Role::User, "c", MessageMeta::default())
            .await
            .unwrap();

        let history = resolver.materialize_history(&s3.id).await.unwrap();
        assert_eq!(
            roles(&history),
            vec![(Role::User, "a"), (Role::User, "b"), (Role::User, "c")]
        );
    }

    #[tokio::test]
    async fn test_unknown_session_not_found() {
        let (_, resolver) = setup().await;
        let err = resolver.materialize_history("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fork_cycle_detected() {
        let (graph, resolver) = setup().await;

        let s1 = graph.create_session("u1", "a", None, None).await.unwrap();
        let s2 = graph.fork_session(&s1.id, "u1", None).await.unwrap();

        // Corrupt s1 to fork from its own descendant.
        let meta = serde_json::json!({ "forked_from": s2.id }).to_string();
        sqlx::query("UPDATE memories SET metadata = ? WHERE id = ?")
            .bind(&meta)
            .bind(&s1.id)
            .execute(resolver_pool(&resolver))
            .await
            .unwrap();

        let err = resolver.materialize_history(&s2.id).await.unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
    }

    #[tokio::test]
    async fn test_blank_messages_filtered() {
        let (graph, resolver) = setup().await;

        let s1 = graph.create_session("u1", "chat", None, None).await.unwrap();
        graph
            .append_history(&s1.id, "u1", Role::Assistant, "", MessageMeta::default())
            .await
            .unwrap();
        graph
            .append_history(&s1.id, "u1", Role::User, "real", MessageMeta::default())
            .await
            .unwrap();

        let history = resolver.materialize_history(&s1.id).await.unwrap();
        assert_eq!(roles(&history), vec![(Role::User, "real")]);
    }

    #[tokio::test]
    async fn test_peek_returns_only_open_run() {
        let (graph, resolver) = setup().await;

        let s1 = graph.create_session("u1", "chat", None, None).await.unwrap();
        graph
            .append_partial(&s1.id, "u1", Role::Assistant, "fin", 1, true)
            .await
            .unwrap();
        graph
            .append_partial(&s1.id, "u1", Role::Assistant, "str", 2, false)
            .await
            .unwrap();
        graph
            .append_partial(&s1.id, "u1", Role::Assistant, "eam", 3, false)
            .await
            .unwrap();

        let open = resolver.peek_open_turn(&s1.id).await.unwrap();
        assert_eq!(
            roles(&open),
            vec![(Role::Assistant, "str"), (Role::Assistant, "eam")]
        );

        // Raw partials never leak into materialized history.
        let history = resolver.materialize_history(&s1.id).await.unwrap();
        assert!(history.is_empty());
    }

    fn resolver_pool(resolver: &ResolverService) -> &DbPool {
        &resolver.db
    }
}
