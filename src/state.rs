//! Application state for Braid.
//!
//! Contains the shared state that is passed to all handlers. Built once
//! at startup from an explicit Config; services hold the pool and no
//! other global state exists.

use crate::config::Config;
use crate::db::DbPool;
use crate::services::{ConsolidatorService, GraphService, ResolverService};
use crate::Result;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: DbPool,
    /// Graph accessor: sessions, messages, edges.
    pub graph: GraphService,
    /// Conversation materialization.
    pub resolver: ResolverService,
    /// Partial-fragment consolidation engine.
    pub consolidator: ConsolidatorService,
}

impl AppState {
    /// Create a new application state, initializing the store.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::init_pool(&config.database.path).await?;
        crate::db::initialize_schema(&db).await?;

        Ok(Self::from_pool(db))
    }

    /// Build state over an existing pool (tests, embedders).
    pub fn from_pool(db: DbPool) -> Self {
        let graph = GraphService::new(db.clone());
        let resolver = ResolverService::new(db.clone());
        let consolidator = ConsolidatorService::new(db.clone());

        Self {
            db,
            graph,
            resolver,
            consolidator,
        }
    }
}
