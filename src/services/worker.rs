//! Background consolidation worker.
//!
//! Polls the consolidation schedule, claims jobs in batches and runs the
//! consolidation engine once per distinct session in the batch. Multiple
//! workers may run against the same store; per-session leases keep any
//! one session on a single worker at a time, and a sweeper returns
//! claims abandoned by crashed workers to the queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::db::{self, DbPool};
use crate::models::Job;
use crate::services::ConsolidatorService;
use crate::Result;

/// Retry policy for transient store errors on the poll path.
///
/// Only the claim/poll loop retries; request-path callers always see
/// store errors directly.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Run an operation, retrying transient failures with fixed backoff.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Transient store error, backing off");
                    sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// What happened to one claimed job.
enum JobOutcome {
    /// Processed (or covered by an earlier job in the same batch).
    Done,
    /// Session lease held elsewhere; job goes back to the queue.
    Deferred,
}

/// Background consolidation worker service.
#[derive(Clone)]
pub struct ConsolidationWorker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    db: DbPool,
    consolidator: ConsolidatorService,
    config: WorkerConfig,
    retry: RetryPolicy,
    running: RwLock<bool>,
    worker_id: String,
}

impl ConsolidationWorker {
    pub fn new(db: DbPool, consolidator: ConsolidatorService, config: WorkerConfig) -> Self {
        let worker_id = format!("worker-{}-{}", hostname(), nanoid::nanoid!(8));

        Self {
            inner: Arc::new(WorkerInner {
                db,
                consolidator,
                config,
                retry: RetryPolicy::default(),
                running: RwLock::new(false),
                worker_id,
            }),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Start the worker loop and the stale-claim sweeper.
    /// Returns a handle that can be used to stop the worker.
    pub async fn start(&self) -> ConsolidationWorkerHandle {
        *self.inner.running.write().await = true;

        let worker = self.clone();
        let main_handle = tokio::spawn(async move {
            worker.run_loop().await;
        });

        let sweeper = self.clone();
        tokio::spawn(async move {
            sweeper.run_sweep_loop().await;
        });

        info!(worker_id = %self.inner.worker_id, "Consolidation worker started");

        ConsolidationWorkerHandle {
            worker: self.clone(),
            _handle: main_handle,
        }
    }

    /// Run the main processing loop.
    async fn run_loop(&self) {
        loop {
            if !*self.inner.running.read().await {
                info!(worker_id = %self.inner.worker_id, "Consolidation worker stopping");
                break;
            }

            match self.drain_once().await {
                Ok(0) => {
                    sleep(self.inner.config.poll_interval).await;
                }
                Ok(n) => {
                    debug!(worker_id = %self.inner.worker_id, jobs = n, "Batch processed");
                }
                Err(e) => {
                    error!(error = %e, "Error draining consolidation queue");
                    sleep(self.inner.config.poll_interval).await;
                }
            }
        }
    }

    /// Periodically return abandoned claims to the queue.
    async fn run_sweep_loop(&self) {
        loop {
            if !*self.inner.running.read().await {
                break;
            }

            match db::sweep_stale_jobs(&self.inner.db, self.inner.config.stale_after).await {
                Ok(recovered) if recovered > 0 => {
                    info!(count = recovered, "Recovered stale consolidation jobs");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Error recovering stale jobs");
                }
            }

            sleep(self.inner.config.stale_after).await;
        }
    }

    /// Claim one batch and process it. Returns the number of jobs taken
    /// off the queue. Public so tests and embedders can drive the worker
    /// without the poll loop.
    pub async fn drain_once(&self) -> Result<usize> {
        let retry = self.inner.retry.clone();
        let jobs = retry
            .run(|| {
                db::claim_batch(
                    &self.inner.db,
                    &self.inner.worker_id,
                    self.inner.config.claim_batch,
                )
            })
            .await?;

        if jobs.is_empty() {
            return Ok(0);
        }

        let mut handled_sessions: HashSet<String> = HashSet::new();
        let mut taken = 0;

        for job in &jobs {
            match self.process_job(job, &mut handled_sessions).await {
                Ok(JobOutcome::Done) => {
                    db::finish_job(&self.inner.db, job.id, None).await?;
                    taken += 1;
                }
                Ok(JobOutcome::Deferred) => {
                    db::release_job(&self.inner.db, job.id).await?;
                }
                Err(e) => {
                    // Failures are terminal per job; a new partial will
                    // queue a fresh one.
                    error!(job_id = job.id, rec = %job.rec, error = %e, "Consolidation job failed");
                    db::finish_job(&self.inner.db, job.id, Some(&e.to_string())).await?;
                    taken += 1;
                }
            }
        }

        Ok(taken)
    }

    async fn process_job(
        &self,
        job: &Job,
        handled_sessions: &mut HashSet<String>,
    ) -> Result<JobOutcome> {
        let session_id = match db::session_of(&self.inner.db, &job.rec).await? {
            Some(id) => id,
            None => {
                // The record lives outside any session; nothing to merge.
                debug!(job_id = job.id, rec = %job.rec, "Job record has no session, finishing");
                return Ok(JobOutcome::Done);
            }
        };

        // One consolidation pass covers every job pointing at the same
        // session in this batch.
        if handled_sessions.contains(&session_id) {
            return Ok(JobOutcome::Done);
        }

        if !db::try_lock_session(
            &self.inner.db,
            &session_id,
            &self.inner.worker_id,
            self.inner.config.lock_ttl,
        )
        .await?
        {
            debug!(job_id = job.id, session_id = %session_id, "Session busy on another worker");
            return Ok(JobOutcome::Deferred);
        }

        let result = self
            .inner
            .consolidator
            .consolidate_session(&session_id, &self.inner.worker_id)
            .await;

        db::unlock_session(&self.inner.db, &session_id, &self.inner.worker_id).await?;

        match result {
            Ok(promoted) => {
                if promoted > 0 {
                    info!(
                        job_id = job.id,
                        session_id = %session_id,
                        promoted,
                        worker_id = %self.inner.worker_id,
                        "Session consolidated"
                    );
                }
                handled_sessions.insert(session_id);
                Ok(JobOutcome::Done)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop the worker.
    pub async fn stop(&self) {
        info!("Stopping consolidation worker");
        *self.inner.running.write().await = false;
    }
}

/// Handle for the running worker.
pub struct ConsolidationWorkerHandle {
    worker: ConsolidationWorker,
    _handle: tokio::task::JoinHandle<()>,
}

impl ConsolidationWorkerHandle {
    pub async fn stop(self) {
        self.worker.stop().await;
    }
}

/// Get hostname for worker IDs.
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{initialize_schema, init_pool};
    use crate::models::Role;
    use crate::services::{GraphService, ResolverService};

    async fn setup() -> (DbPool, GraphService, ResolverService, ConsolidationWorker) {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let worker = ConsolidationWorker::new(
            pool.clone(),
            ConsolidatorService::new(pool.clone()),
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                claim_batch: 16,
                stale_after: Duration::from_secs(300),
                lock_ttl: Duration::from_secs(300),
            },
        );

        (
            pool.clone(),
            GraphService::new(pool.clone()),
            ResolverService::new(pool),
            worker,
        )
    }

    #[tokio::test]
    async fn test_drain_consolidates_streamed_turn() {
        let (pool, graph, resolver, worker) = setup().await;

        let s = graph.create_session("u1", "chat", None, None).await.unwrap();
        graph
            .append_partial(&s.id, "u1", Role::Assistant, "Hel", 1, false)
            .await
            .unwrap();
        graph
            .append_partial(&s.id, "u1", Role::Assistant, "lo", 2, true)
            .await
            .unwrap();

        let taken = worker.drain_once().await.unwrap();
        assert_eq!(taken, 2);

        let history = resolver.materialize_history(&s.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Hello");

        assert_eq!(db::count_open_jobs(&pool).await.unwrap(), 0);
        assert_eq!(worker.drain_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_job_without_session_finishes_as_noop() {
        let (pool, _graph, _resolver, worker) = setup().await;

        db::enqueue(&pool, "free-floating-memory").await.unwrap();
        assert_eq!(worker.drain_once().await.unwrap(), 1);
        assert_eq!(db::count_open_jobs(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_locked_session_defers_job() {
        let (pool, graph, _resolver, worker) = setup().await;

        let s = graph.create_session("u1", "chat", None, None).await.unwrap();
        graph
            .append_partial(&s.id, "u1", Role::User, "hi", 1, true)
            .await
            .unwrap();

        // Another worker holds the session.
        assert!(
            db::try_lock_session(&pool, &s.id, "other-worker", Duration::from_secs(300))
                .await
                .unwrap()
        );

        assert_eq!(worker.drain_once().await.unwrap(), 0);
        // Deferred, not finished: still one open job.
        assert_eq!(db::count_open_jobs(&pool).await.unwrap(), 1);

        db::unlock_session(&pool, &s.id, "other-worker").await.unwrap();
        assert_eq!(worker.drain_once().await.unwrap(), 1);
        assert_eq!(db::count_open_jobs(&pool).await.unwrap(), 0);
    }
}
