//! Consolidation job models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row in the consolidation schedule.
///
/// `rec` is the memory id whose insertion triggered the job. Claimable
/// while `started_at` is NULL; `finished_at` is terminal whether the run
/// succeeded or recorded an error.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub rec: String,
    pub queued_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error_msg: Option<String>,
    pub claimed_by: Option<String>,
}

impl Job {
    pub fn is_claimable(&self) -> bool {
        self.started_at.is_none() && self.finished_at.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_errored(&self) -> bool {
        self.error_msg.is_some()
    }
}
