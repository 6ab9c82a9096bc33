//! Consolidation schedule queries.
//!
//! A durable work queue over the consolidation_schedule table. SQLite has
//! no `FOR UPDATE SKIP LOCKED`, so claiming is a single atomic
//! `UPDATE ... WHERE id IN (SELECT ... LIMIT n) RETURNING *` plus a lease
//! (claimed_by/started_at) with a stale sweeper. Per-session serialization
//! across workers uses the session_locks lease table.

use std::time::Duration;

use sqlx::SqliteConnection;

use crate::models::{now_rfc3339, Job};
use crate::{Error, Result};

use super::DbPool;

/// Enqueue a consolidation job inside an existing transaction.
///
/// Returns false when an open job for the same record already exists.
pub(crate) async fn enqueue_tx(conn: &mut SqliteConnection, rec: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO consolidation_schedule (rec, queued_at)
        VALUES (?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(rec)
    .bind(now_rfc3339())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Enqueue a consolidation job for a memory id. Idempotent while an open
/// job for the same record exists.
pub async fn enqueue(pool: &DbPool, rec: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let inserted = enqueue_tx(&mut tx, rec).await?;
    tx.commit().await?;
    Ok(inserted)
}

/// Atomically claim up to `n` queued jobs for a worker.
///
/// A single UPDATE statement runs under SQLite's write lock, so two
/// concurrent claimers can never receive the same row.
pub async fn claim_batch(pool: &DbPool, worker_id: &str, n: u32) -> Result<Vec<Job>> {
    let jobs = sqlx::query_as::<_, Job>(
        r#"
        UPDATE consolidation_schedule
        SET started_at = ?1, claimed_by = ?2
        WHERE finished_at IS NULL AND started_at IS NULL
          AND id IN (
            SELECT id FROM consolidation_schedule
            WHERE finished_at IS NULL AND started_at IS NULL
            ORDER BY queued_at ASC, id ASC
            LIMIT ?3
          )
        RETURNING *
        "#,
    )
    .bind(now_rfc3339())
    .bind(worker_id)
    .bind(n)
    .fetch_all(pool)
    .await?;

    Ok(jobs)
}

/// Mark a job finished, recording the error if the run failed. Both
/// outcomes are terminal; a new partial triggers a new job.
pub async fn finish_job(pool: &DbPool, job_id: i64, error: Option<&str>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE consolidation_schedule
        SET finished_at = ?, error_msg = ?
        WHERE id = ? AND finished_at IS NULL
        "#,
    )
    .bind(now_rfc3339())
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Return a claimed job to the queue (used when its session lock is held
/// by another worker).
pub async fn release_job(pool: &DbPool, job_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE consolidation_schedule
        SET started_at = NULL, claimed_by = NULL
        WHERE id = ? AND finished_at IS NULL
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Sweep claims abandoned by crashed workers back onto the queue.
/// Returns the number of jobs recovered.
pub async fn sweep_stale_jobs(pool: &DbPool, older_than: Duration) -> Result<u64> {
    let cutoff = (crate::models::now()
        - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero()))
    .to_rfc3339();

    let result = sqlx::query(
        r#"
        UPDATE consolidation_schedule
        SET started_at = NULL, claimed_by = NULL
        WHERE finished_at IS NULL AND started_at IS NOT NULL AND started_at < ?
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Get a job by id.
pub async fn get_job(pool: &DbPool, job_id: i64) -> Result<Job> {
    sqlx::query_as::<_, Job>("SELECT * FROM consolidation_schedule WHERE id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("job not found: {}", job_id)))
}

/// Count jobs that have not finished yet (queued or in flight).
pub async fn count_open_jobs(pool: &DbPool) -> Result<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM consolidation_schedule WHERE finished_at IS NULL")
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Try to take the per-session consolidation lease.
///
/// Expired leases are swept first; acquisition is an INSERT OR IGNORE, so
/// exactly one worker holds a session at a time.
pub async fn try_lock_session(
    pool: &DbPool,
    session_id: &str,
    worker_id: &str,
    ttl: Duration,
) -> Result<bool> {
    let cutoff = (crate::models::now()
        - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()))
    .to_rfc3339();

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM session_locks WHERE session_id = ? AND locked_at < ?")
        .bind(session_id)
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query(
        r#"
        INSERT INTO session_locks (session_id, locked_by, locked_at)
        VALUES (?, ?, ?)
        ON CONFLICT (session_id) DO NOTHING
        "#,
    )
    .bind(session_id)
    .bind(worker_id)
    .bind(now_rfc3339())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Release a session lease held by this worker.
pub async fn unlock_session(pool: &DbPool, session_id: &str, worker_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM session_locks WHERE session_id = ? AND locked_by = ?")
        .bind(session_id)
        .bind(worker_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{initialize_schema, init_pool};

    async fn setup_test_db() -> DbPool {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_while_open() {
        let pool = setup_test_db().await;

        assert!(enqueue(&pool, "mem-1").await.unwrap());
        assert!(!enqueue(&pool, "mem-1").await.unwrap());

        // Once the open job finishes, the same record can queue again.
        let jobs = claim_batch(&pool, "w1", 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        finish_job(&pool, jobs[0].id, None).await.unwrap();

        assert!(enqueue(&pool, "mem-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_marks_and_orders() {
        let pool = setup_test_db().await;

        enqueue(&pool, "mem-1").await.unwrap();
        enqueue(&pool, "mem-2").await.unwrap();
        enqueue(&pool, "mem-3").await.unwrap();

        let first = claim_batch(&pool, "w1", 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].rec, "mem-1");
        assert_eq!(first[1].rec, "mem-2");
        assert!(first.iter().all(|j| j.started_at.is_some()));
        assert!(first.iter().all(|j| j.claimed_by.as_deref() == Some("w1")));

        // A second claimer only sees what is left.
        let second = claim_batch(&pool, "w2", 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].rec, "mem-3");
    }

    #[tokio::test]
    async fn test_finish_records_error_and_is_terminal() {
        let pool = setup_test_db().await;

        enqueue(&pool, "mem-1").await.unwrap();
        let jobs = claim_batch(&pool, "w1", 1).await.unwrap();

        finish_job(&pool, jobs[0].id, Some("boom")).await.unwrap();
        let job = get_job(&pool, jobs[0].id).await.unwrap();
        assert!(job.is_finished());
        assert_eq!(job.error_msg.as_deref(), Some("boom"));

        // Finished jobs are never swept back.
        let recovered = sweep_stale_jobs(&pool, Duration::from_secs(0)).await.unwrap();
        assert_eq!(recovered, 0);
    }

    #[tokio::test]
    async fn test_stale_claims_are_recovered() {
        let pool = setup_test_db().await;

        enqueue(&pool, "mem-1").await.unwrap();
        let claimed = claim_batch(&pool, "w1", 1).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Nothing claimable while the lease is fresh.
        assert!(claim_batch(&pool, "w2", 1).await.unwrap().is_empty());

        let recovered = sweep_stale_jobs(&pool, Duration::from_secs(0)).await.unwrap();
        assert_eq!(recovered, 1);

        let reclaimed = claim_batch(&pool, "w2", 1).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].rec, "mem-1");
    }

    #[tokio::test]
    async fn test_session_lock_excludes_and_releases() {
        let pool = setup_test_db().await;

        assert!(try_lock_session(&pool, "sess-1", "w1", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!try_lock_session(&pool, "sess-1", "w2", Duration::from_secs(60))
            .await
            .unwrap());
        // A different session is independent.
        assert!(try_lock_session(&pool, "sess-2", "w2", Duration::from_secs(60))
            .await
            .unwrap());

        unlock_session(&pool, "sess-1", "w1").await.unwrap();
        assert!(try_lock_session(&pool, "sess-1", "w2", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expired_session_lock_is_stolen() {
        let pool = setup_test_db().await;

        assert!(try_lock_session(&pool, "sess-1", "w1", Duration::from_secs(60))
            .await
            .unwrap());
        // Zero TTL treats every lease as expired.
        assert!(try_lock_session(&pool, "sess-1", "w2", Duration::from_secs(0))
            .await
            .unwrap());
    }
}
