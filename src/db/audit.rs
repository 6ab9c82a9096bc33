//! Append-only audit trail.
//!
//! Every node and edge write records who did what with old/new values.
//! The log is written inside the same transaction as the change it
//! describes and is never read on any hot path.

use sqlx::SqliteConnection;

use crate::models::now_rfc3339;
use crate::Result;

/// Append one audit entry. Call inside the transaction of the write
/// being audited.
pub async fn record_audit(
    conn: &mut SqliteConnection,
    actor: &str,
    action: &str,
    record_id: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (actor, action, record_id, old_value, new_value, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(actor)
    .bind(action)
    .bind(record_id)
    .bind(old_value)
    .bind(new_value)
    .bind(now_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

/// Count audit entries for a record (used by tests and debug tooling).
pub async fn count_audit_entries(pool: &super::DbPool, record_id: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log WHERE record_id = ?")
        .bind(record_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
