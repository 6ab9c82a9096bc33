//! Consolidation engine.
//!
//! Merges streamed partial fragments into finalized history nodes,
//! exactly once. Fragments are grouped into contiguous same-role runs;
//! a `done` fragment always closes its run. Each closed run collapses
//! into its last fragment (the anchor), which is promoted to history
//! with the concatenated content while the rest are tombstoned.

use tracing::{debug, info};

use crate::db::{self, DbPool, PromoteOutcome};
use crate::models::{Memory, Role};
use crate::{Error, Result};

/// Service that merges partial fragments into history nodes.
#[derive(Clone)]
pub struct ConsolidatorService {
    db: DbPool,
}

/// A partial row reduced to what grouping needs.
#[derive(Debug, Clone)]
struct Fragment {
    id: String,
    role: Role,
    done: bool,
    content: String,
}

/// One contiguous same-role run of fragments.
#[derive(Debug)]
struct Group {
    fragments: Vec<Fragment>,
    /// Closed groups are ready to merge. The trailing run of a session
    /// stays open until its `done` fragment arrives.
    closed: bool,
}

impl ConsolidatorService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Consolidate every closed run of partials in a session.
    /// Returns the number of history nodes produced.
    ///
    /// Re-running over a session whose runs were already finalized is a
    /// no-op: finalized anchors are no longer partials, so they do not
    /// show up in the fetch, and a racing promote is detected and
    /// skipped.
    pub async fn consolidate_session(&self, session_id: &str, actor: &str) -> Result<usize> {
        let rows = db::active_partials(&self.db, session_id).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let fragments = rows
            .iter()
            .map(to_fragment)
            .collect::<Result<Vec<_>>>()?;

        let groups = group_fragments(fragments);

        let mut promoted = 0;
        for group in groups {
            if !group.closed {
                debug!(
                    session_id,
                    fragments = group.fragments.len(),
                    "Leaving open trailing run for a later pass"
                );
                continue;
            }

            let merged: String = group
                .fragments
                .iter()
                .map(|f| f.content.as_str())
                .collect();

            let (anchor, predecessors) = match group.fragments.split_last() {
                Some((anchor, rest)) => (
                    anchor,
                    rest.iter().map(|f| f.id.clone()).collect::<Vec<_>>(),
                ),
                None => continue,
            };

            match db::promote_partial_group(&self.db, &anchor.id, &merged, &predecessors, actor)
                .await?
            {
                PromoteOutcome::Promoted => {
                    promoted += 1;
                    info!(
                        session_id,
                        anchor_id = %anchor.id,
                        role = %anchor.role.as_str(),
                        fragments = predecessors.len() + 1,
                        "Consolidated run into history"
                    );
                }
                PromoteOutcome::AlreadyFinal => {
                    debug!(session_id, anchor_id = %anchor.id, "Run already finalized");
                }
            }
        }

        Ok(promoted)
    }
}

fn to_fragment(memory: &Memory) -> Result<Fragment> {
    let meta = memory.meta();
    let role = meta.role.ok_or_else(|| {
        Error::DataIntegrity(format!("partial {} has no role", memory.id))
    })?;

    Ok(Fragment {
        id: memory.id.clone(),
        role,
        done: meta.done.unwrap_or(false),
        content: memory.content.clone(),
    })
}

/// Split an ordered fragment sequence into contiguous runs.
///
/// A run breaks when the role changes, and a `done` fragment always
/// closes its run even if the next fragment has the same role (distinct
/// conversational turns). Only the trailing run can be open.
fn group_fragments(fragments: Vec<Fragment>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut current: Vec<Fragment> = Vec::new();

    for fragment in fragments {
        if let Some(last) = current.last() {
            if last.role != fragment.role {
                groups.push(Group {
                    fragments: std::mem::take(&mut current),
                    closed: true,
                });
            }
        }

        let done = fragment.done;
        current.push(fragment);

        if done {
            groups.push(Group {
                fragments: std::mem::take(&mut current),
                closed: true,
            });
        }
    }

    if !current.is_empty() {
        groups.push(Group {
            fragments: current,
            closed: false,
        });
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{initialize_schema, init_pool};
    use crate::services::{GraphService, ResolverService};

    async fn setup() -> (GraphService, ResolverService, ConsolidatorService) {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        (
            GraphService::new(pool.clone()),
            ResolverService::new(pool.clone()),
            ConsolidatorService::new(pool),
        )
    }

    fn frag(id: &str, role: Role, done: bool, content: &str) -> Fragment {
        Fragment {
            id: id.to_string(),
            role,
            done,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_grouping_splits_on_role_change() {
        let groups = group_fragments(vec![
            frag("1", Role::Assistant, true, "A"),
            frag("2", Role::User, true, "B"),
        ]);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.closed));
    }

    #[test]
    fn test_grouping_done_closes_same_role_runs() {
        let groups = group_fragments(vec![
            frag("1", Role::Assistant, false, "first "),
            frag("2", Role::Assistant, true, "turn"),
            frag("3", Role::Assistant, false, "second"),
        ]);
        assert_eq!(groups.len(), 2);
        assert!(groups[0].closed);
        assert_eq!(groups[0].fragments.len(), 2);
        // The trailing run has not seen its done fragment yet.
        assert!(!groups[1].closed);
    }

    #[test]
    fn test_grouping_role_change_closes_undone_run() {
        let groups = group_fragments(vec![
            frag("1", Role::Assistant, false, "lost done"),
            frag("2", Role::User, true, "next turn"),
        ]);
        assert_eq!(groups.len(), 2);
        // The run can never continue once the role moved on.
        assert!(groups[0].closed);
        assert!(groups[1].closed);
    }

    #[tokio::test]
    async fn test_concatenates_fragments_into_one_history_node() {
        let (graph, resolver, consolidator) = setup().await;

        let s = graph.create_session("u1", "chat", None, None).await.unwrap();
        graph
            .append_partial(&s.id, "u1", Role::User, "Hel", 1, false)
            .await
            .unwrap();
        graph
            .append_partial(&s.id, "u1", Role::User, "lo", 2, true)
            .await
            .unwrap();

        let promoted = consolidator.consolidate_session(&s.id, "u1").await.unwrap();
        assert_eq!(promoted, 1);

        let history = resolver.materialize_history(&s.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_role_runs_become_separate_history_nodes() {
        let (graph, resolver, consolidator) = setup().await;

        let s = graph.create_session("u1", "chat", None, None).await.unwrap();
        graph
            .append_partial(&s.id, "u1", Role::Assistant, "A", 1, true)
            .await
            .unwrap();
        graph
            .append_partial(&s.id, "u1", Role::User, "B", 2, true)
            .await
            .unwrap();

        let promoted = consolidator.consolidate_session(&s.id, "u1").await.unwrap();
        assert_eq!(promoted, 2);

        let history = resolver.materialize_history(&s.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!((history[0].role, history[0].content.as_str()), (Role::Assistant, "A"));
        assert_eq!((history[1].role, history[1].content.as_str()), (Role::User, "B"));
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let (graph, resolver, consolidator) = setup().await;

        let s = graph.create_session("u1", "chat", None, None).await.unwrap();
        graph
            .append_partial(&s.id, "u1", Role::User, "Hel", 1, false)
            .await
            .unwrap();
        graph
            .append_partial(&s.id, "u1", Role::User, "lo", 2, true)
            .await
            .unwrap();

        assert_eq!(consolidator.consolidate_session(&s.id, "u1").await.unwrap(), 1);
        assert_eq!(consolidator.consolidate_session(&s.id, "u1").await.unwrap(), 0);

        let history = resolver.materialize_history(&s.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_open_trailing_run_left_alone() {
        let (graph, resolver, consolidator) = setup().await;

        let s = graph.create_session("u1", "chat", None, None).await.unwrap();
        graph
            .append_partial(&s.id, "u1", Role::Assistant, "still ", 1, false)
            .await
            .unwrap();
        graph
            .append_partial(&s.id, "u1", Role::Assistant, "going", 2, false)
            .await
            .unwrap();

        assert_eq!(consolidator.consolidate_session(&s.id, "u1").await.unwrap(), 0);
        assert!(resolver.materialize_history(&s.id).await.unwrap().is_empty());
        assert_eq!(resolver.peek_open_turn(&s.id).await.unwrap().len(), 2);

        // The done fragment arrives; the whole run now consolidates.
        graph
            .append_partial(&s.id, "u1", Role::Assistant, "!", 3, true)
            .await
            .unwrap();
        assert_eq!(consolidator.consolidate_session(&s.id, "u1").await.unwrap(), 1);

        let history = resolver.materialize_history(&s.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "still going!");
    }
}
