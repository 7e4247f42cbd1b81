//! Storage seam for crawl jobs and its PostgreSQL implementation.
//!
//! The worker never inserts rows. It claims queued rows, enriches them with
//! the log path and pid, and finalizes them. Every UPDATE is guarded by the
//! status it expects, so transitions stay monotonic even when a row is
//! touched by something other than its owning worker.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::completion::Completion;
use super::job::{CrawlJob, JobStatus};

/// Message recorded on rows failed over by the recovery sweep.
pub const WORKER_RESTART_MESSAGE: &str = "Worker restart";

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fail every `running` row. Returns the number of rows touched.
    async fn fail_orphaned(&self) -> Result<u64>;

    /// Claim the oldest queued job for `worker_id`, or `None` if nothing is
    /// claimable.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<CrawlJob>>;

    /// Persist the log path of a running job. Re-recording the same path is
    /// accepted; a different path is an error.
    async fn record_log_path(&self, id: Uuid, log_path: &str) -> Result<()>;

    /// Persist the crawler pid of a running job. Errors when the job is not
    /// running.
    async fn record_pid(&self, id: Uuid, pid: u32) -> Result<()>;

    /// Move a running job to its terminal state. Returns `false` when the row
    /// was not running; errors when `completion` is not a terminal status.
    async fn complete(&self, id: Uuid, completion: &Completion) -> Result<bool>;

    /// Load a job by internal id.
    async fn find(&self, id: Uuid) -> Result<Option<CrawlJob>>;
}

/// PostgreSQL-backed job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn fail_orphaned(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'failed',
                ended_at = NOW(),
                pid = NULL,
                error_message = $1,
                updated_at = NOW()
            WHERE status = 'running'
            "#,
        )
        .bind(WORKER_RESTART_MESSAGE)
        .execute(&self.pool)
        .await
        .context("Failed to fail orphaned crawl jobs")?;

        Ok(result.rows_affected())
    }

    /// Claims with `FOR UPDATE SKIP LOCKED`, so a row locked by a concurrent
    /// claimer is skipped rather than handed out twice.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<CrawlJob>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin claim transaction")?;

        let job = sqlx::query_as::<_, CrawlJob>(
            r#"
            WITH next_job AS (
                SELECT id
                FROM crawl_jobs
                WHERE status = 'queued'
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE crawl_jobs
            SET status = 'running',
                locked_at = NOW(),
                locked_by = $1,
                started_at = NOW(),
                updated_at = NOW()
            FROM next_job
            WHERE crawl_jobs.id = next_job.id
            RETURNING crawl_jobs.id, crawl_jobs.job_id, crawl_jobs.status, crawl_jobs.params,
                      crawl_jobs.locked_at, crawl_jobs.locked_by, crawl_jobs.started_at,
                      crawl_jobs.ended_at, crawl_jobs.pid, crawl_jobs.exit_code,
                      crawl_jobs.log_path, crawl_jobs.error_message,
                      crawl_jobs.created_at, crawl_jobs.updated_at
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to claim crawl job")?;

        tx.commit()
            .await
            .context("Failed to commit claim transaction")?;

        Ok(job)
    }

    async fn record_log_path(&self, id: Uuid, log_path: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET log_path = $2,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'running'
              AND (log_path IS NULL OR log_path = $2)
            "#,
        )
        .bind(id)
        .bind(log_path)
        .execute(&self.pool)
        .await
        .context("Failed to record crawl job log path")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("job {id} is not running or already has a different log path");
        }

        Ok(())
    }

    async fn record_pid(&self, id: Uuid, pid: u32) -> Result<()> {
        let pid = i32::try_from(pid).context("pid does not fit in INTEGER")?;

        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET pid = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(pid)
        .execute(&self.pool)
        .await
        .context("Failed to record crawl job pid")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("job {id} is not running");
        }

        Ok(())
    }

    async fn complete(&self, id: Uuid, completion: &Completion) -> Result<bool> {
        if !JobStatus::Running.can_transition_to(completion.status) {
            anyhow::bail!("{:?} is not a terminal status", completion.status);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin completion transaction")?;

        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = $2,
                exit_code = $3,
                error_message = $4,
                ended_at = NOW(),
                pid = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(completion.status)
        .bind(completion.exit_code)
        .bind(completion.error_message.as_deref())
        .execute(&mut *tx)
        .await
        .context("Failed to complete crawl job")?;

        tx.commit()
            .await
            .context("Failed to commit completion transaction")?;

        Ok(result.rows_affected() == 1)
    }

    async fn find(&self, id: Uuid) -> Result<Option<CrawlJob>> {
        let job = sqlx::query_as::<_, CrawlJob>(
            r#"
            SELECT id, job_id, status, params, locked_at, locked_by, started_at, ended_at,
                   pid, exit_code, log_path, error_message, created_at, updated_at
            FROM crawl_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load crawl job")?;

        Ok(job)
    }
}
