//! Edge models.
//!
//! Edges are directed, typed relations between memories. Session
//! membership is always `belongs_to` from message to session; fork
//! lineage is `forked_from` from child session to parent.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Relation enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    BelongsTo,
    ForkedFrom,
    References,
    Related,
    HasType,
    Custom(String),
}

impl Relation {
    pub fn as_str(&self) -> &str {
        match self {
            Self::BelongsTo => "belongs_to",
            Self::ForkedFrom => "forked_from",
            Self::References => "references",
            Self::Related => "related",
            Self::HasType => "has_type",
            Self::Custom(s) => s,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "belongs_to" => Self::BelongsTo,
            "forked_from" => Self::ForkedFrom,
            "references" => Self::References,
            "related" => Self::Related,
            "has_type" => Self::HasType,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Direction of an edge query relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    /// Node is the source.
    Outgoing,
    /// Node is the target.
    Incoming,
}

/// Memory edge record from the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MemoryEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
    pub strength: Option<f64>,
    pub confidence: Option<f64>,
    pub metadata: String,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: String,
}

impl MemoryEdge {
    /// Get the relation as enum.
    pub fn relation_enum(&self) -> Relation {
        Relation::from_str(&self.relation)
    }
}
