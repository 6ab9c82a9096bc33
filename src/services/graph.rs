//! Graph accessor service.
//!
//! Typed operations over the memory graph: session creation and forking,
//! message appends (node plus membership edge in one transaction), and
//! general-purpose edges with ownership enforcement.

use tracing::{debug, info};

use crate::db::{self, AppendMessage, CreateEdge, CreateMemory, DbPool};
use crate::models::{
    new_id, Memory, MemoryEdge, MemoryKind, MessageMeta, Relation, Role,
};
use crate::{Error, Result};

/// Service for writing to the conversation graph.
#[derive(Clone)]
pub struct GraphService {
    db: DbPool,
}

impl GraphService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Create a session, optionally forked from a parent.
    ///
    /// When forking, an omitted `forked_at` defaults to the parent's most
    /// recent message id, so the child inherits everything up to the
    /// moment of the fork.
    pub async fn create_session(
        &self,
        owner: &str,
        title: &str,
        forked_from: Option<&str>,
        forked_at: Option<&str>,
    ) -> Result<Memory> {
        let mut meta = MessageMeta::default();

        if let Some(parent_id) = forked_from {
            let parent = db::get_memory(&self.db, parent_id).await?;
            if parent.kind_enum() != MemoryKind::Session {
                return Err(Error::Validation(format!(
                    "fork parent is not a session: {}",
                    parent_id
                )));
            }

            let cutoff = match forked_at {
                Some(id) => Some(id.to_string()),
                None => db::latest_message_id(&self.db, parent_id).await?,
            };

            meta.forked_from = Some(parent_id.to_string());
            meta.forked_at = cutoff;
        }

        let session = db::create_memory(
            &self.db,
            CreateMemory {
                id: new_id(),
                kind: MemoryKind::Session,
                content: Some(title.to_string()),
                metadata: meta.clone(),
                created_by: owner.to_string(),
            },
        )
        .await?;

        // Fork lineage is also visible as a graph edge, child -> parent.
        if let Some(parent_id) = forked_from {
            db::create_edge(
                &self.db,
                CreateEdge::new(&session.id, parent_id, Relation::ForkedFrom, owner),
            )
            .await?;
        }

        info!(
            session_id = %session.id,
            owner = %owner,
            forked_from = ?meta.forked_from,
            "Session created"
        );

        Ok(session)
    }

    /// Fork an existing session at an optional cutoff message.
    pub async fn fork_session(
        &self,
        parent_id: &str,
        owner: &str,
        forked_at: Option<&str>,
    ) -> Result<Memory> {
        let parent = db::get_memory(&self.db, parent_id).await?;
        let title = format!("{} (fork)", parent.content);
        self.create_session(owner, &title, Some(parent_id), forked_at)
            .await
    }

    /// List a user's live sessions, newest first.
    pub async fn list_sessions(&self, owner: &str) -> Result<Vec<Memory>> {
        db::list_memories(&self.db, owner, Some(&MemoryKind::Session), 100, 0).await
    }

    /// Append a finalized history message to a session, bypassing
    /// consolidation.
    pub async fn append_history(
        &self,
        session_id: &str,
        owner: &str,
        role: Role,
        content: &str,
        mut meta: MessageMeta,
    ) -> Result<Memory> {
        meta.role = Some(role);
        self.append(session_id, owner, MemoryKind::History, content, meta)
            .await
    }

    /// Append a streamed partial fragment. The fragment, its membership
    /// edge and its consolidation job commit together.
    pub async fn append_partial(
        &self,
        session_id: &str,
        owner: &str,
        role: Role,
        content: &str,
        seq: i64,
        done: bool,
    ) -> Result<Memory> {
        let meta = MessageMeta {
            role: Some(role),
            seq: Some(seq),
            done: Some(done),
            ..Default::default()
        };
        self.append(session_id, owner, MemoryKind::Partial, content, meta)
            .await
    }

    async fn append(
        &self,
        session_id: &str,
        owner: &str,
        kind: MemoryKind,
        content: &str,
        meta: MessageMeta,
    ) -> Result<Memory> {
        let session = db::get_memory(&self.db, session_id).await?;
        if session.kind_enum() != MemoryKind::Session {
            return Err(Error::Validation(format!(
                "not a session: {}",
                session_id
            )));
        }

        let message = db::append_message(
            &self.db,
            AppendMessage {
                id: new_id(),
                session_id: session_id.to_string(),
                kind: kind.clone(),
                content: content.to_string(),
                metadata: meta,
                created_by: owner.to_string(),
            },
        )
        .await?;

        debug!(
            message_id = %message.id,
            session_id = %session_id,
            kind = %kind.as_str(),
            "Message appended"
        );

        Ok(message)
    }

    /// Create a general-purpose edge between two memories.
    ///
    /// The actor must own the source node; cross-owner edges are refused.
    pub async fn connect(
        &self,
        actor: &str,
        source_id: &str,
        target_id: &str,
        relation: Relation,
        strength: Option<f64>,
        confidence: Option<f64>,
    ) -> Result<MemoryEdge> {
        let source = db::get_memory(&self.db, source_id).await?;
        if source.created_by != actor {
            return Err(Error::Forbidden(format!(
                "{} does not own source node {}",
                actor, source_id
            )));
        }
        // Target must exist (tombstoned counts as gone).
        db::get_memory(&self.db, target_id).await?;

        db::create_edge(
            &self.db,
            CreateEdge {
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
                relation,
                strength,
                confidence,
                metadata: MessageMeta::default(),
                created_by: actor.to_string(),
            },
        )
        .await
    }

    /// Tombstone a memory the actor owns.
    pub async fn tombstone(&self, actor: &str, memory_id: &str) -> Result<()> {
        let memory = match db::get_memory_any(&self.db, memory_id).await? {
            Some(m) => m,
            None => return Err(Error::NotFound(format!("memory not found: {}", memory_id))),
        };
        if memory.created_by != actor {
            return Err(Error::Forbidden(format!(
                "{} does not own {}",
                actor, memory_id
            )));
        }

        db::tombstone_memory(&self.db, memory_id, actor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{initialize_schema, init_pool};

    async fn setup() -> GraphService {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        GraphService::new(pool)
    }

    #[tokio::test]
    async fn test_fork_defaults_cutoff_to_latest_message() {
        let graph = setup().await;

        let s1 = graph
            .create_session("user-1", "root", None, None)
            .await
            .unwrap();
        graph
            .append_history(&s1.id, "user-1", Role::User, "Hi", MessageMeta::default())
            .await
            .unwrap();
        let m2 = graph
            .append_history(&s1.id, "user-1", Role::Assistant, "Hello!", MessageMeta::default())
            .await
            .unwrap();

        let s2 = graph.fork_session(&s1.id, "user-1", None).await.unwrap();
        let meta = s2.meta();
        assert_eq!(meta.forked_from.as_deref(), Some(s1.id.as_str()));
        assert_eq!(meta.forked_at.as_deref(), Some(m2.id.as_str()));
        assert!(s2.content.ends_with("(fork)"));
    }

    #[tokio::test]
    async fn test_fork_of_missing_session_not_found() {
        let graph = setup().await;
        let err = graph
            .fork_session("no-such-session", "user-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_append_rejects_non_sessions() {
        let graph = setup().await;

        let s1 = graph
            .create_session("user-1", "root", None, None)
            .await
            .unwrap();
        let msg = graph
            .append_history(&s1.id, "user-1", Role::User, "Hi", MessageMeta::default())
            .await
            .unwrap();

        let err = graph
            .append_history(&msg.id, "user-1", Role::User, "nested", MessageMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_connect_enforces_source_ownership() {
        let graph = setup().await;

        let s1 = graph
            .create_session("user-1", "mine", None, None)
            .await
            .unwrap();
        let s2 = graph
            .create_session("user-2", "theirs", None, None)
            .await
            .unwrap();

        let err = graph
            .connect("user-2", &s1.id, &s2.id, Relation::Related, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        // Owning the source is sufficient.
        graph
            .connect("user-1", &s1.id, &s2.id, Relation::Related, Some(0.5), None)
            .await
            .unwrap();
    }
}
