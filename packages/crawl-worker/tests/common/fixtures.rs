//! Row fixtures. These stand in for the external producer that inserts jobs.

use anyhow::{Context, Result};
use crawl_worker::kernel::jobs::{CrawlJob, JobStatus};
use sqlx::PgPool;
use uuid::Uuid;

/// Insert a queued job and return its internal id.
pub async fn insert_queued(pool: &PgPool, job_id: &str, params: serde_json::Value) -> Result<Uuid> {
    insert_with_status(pool, job_id, params, JobStatus::Queued).await
}

/// Insert a job directly in the given status.
pub async fn insert_with_status(
    pool: &PgPool,
    job_id: &str,
    params: serde_json::Value,
    status: JobStatus,
) -> Result<Uuid> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO crawl_jobs (job_id, status, params, started_at)
        VALUES ($1, $2, $3, CASE WHEN $2 = 'queued'::crawl_job_status THEN NULL ELSE NOW() END)
        RETURNING id
        "#,
    )
    .bind(job_id)
    .bind(status)
    .bind(params)
    .fetch_one(pool)
    .await
    .with_context(|| format!("Failed to insert job {job_id}"))?;

    Ok(id)
}

/// Load a job by business id.
pub async fn fetch_job(pool: &PgPool, job_id: &str) -> Result<CrawlJob> {
    let job = sqlx::query_as::<_, CrawlJob>(
        r#"
        SELECT id, job_id, status, params, locked_at, locked_by, started_at, ended_at,
               pid, exit_code, log_path, error_message, created_at, updated_at
        FROM crawl_jobs
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("Failed to fetch job {job_id}"))?;

    Ok(job)
}
