//! Data models for Braid.
//!
//! Defines the core types used throughout the system: memory nodes,
//! edges, jobs and the materialized chat message DTO.

mod edge;
mod job;
mod memory;

pub use edge::*;
pub use job::*;
pub use memory::*;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new store id.
///
/// UUIDv7 behind a shared counter context, so ids generated by one
/// process are strictly ordered even within a millisecond. Fork cutoffs
/// and history ordering rely on id order being creation order.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC timestamp as the RFC 3339 string stored in TEXT columns.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_sort_by_creation() {
        let ids: Vec<String> = (0..1000).map(|_| new_id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
