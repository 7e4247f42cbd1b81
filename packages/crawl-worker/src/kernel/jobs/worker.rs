//! Crawl worker service.
//!
//! The `JobWorker` is a long-running service that:
//! - Fails over jobs orphaned by a previous worker process (once, at startup)
//! - Polls the store for the oldest queued job
//! - Runs it through the `JobRunner`
//! - Reconciles the outcome into a terminal job state
//!
//! # Architecture
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► Recovery sweep (fail_orphaned, retried until it succeeds)
//!     └─► loop
//!             ├─► Claim (JobStore::claim_next, row lock)
//!             │       └─► none: sleep poll_interval
//!             ├─► Run (JobRunner::run)
//!             └─► Reconcile (JobStore::complete)
//! ```
//!
//! One job is in flight per worker. Several workers may share a store; the
//! claim's row lock keeps them from picking the same job.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::completion::{reconcile, Completion};
use super::job::CrawlJob;
use super::job_store::JobStore;
use super::runner::JobRunner;
use crate::kernel::service_host::Service;

/// Configuration for the crawl worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Worker ID recorded as `locked_by` on claimed jobs
    pub worker_id: String,
    /// How long to wait when no jobs are available, or after a claim error
    pub poll_interval: Duration,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl JobWorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

pub struct JobWorker {
    store: Arc<dyn JobStore>,
    runner: JobRunner,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(store: Arc<dyn JobStore>, runner: JobRunner, config: JobWorkerConfig) -> Self {
        Self {
            store,
            runner,
            config,
        }
    }

    /// Fail over jobs left running by a dead worker.
    ///
    /// Retries every poll interval until the sweep succeeds. Returns `false`
    /// if shutdown was requested first.
    pub async fn recover(&self, shutdown: &CancellationToken) -> bool {
        loop {
            match self.store.fail_orphaned().await {
                Ok(0) => {
                    debug!("no orphaned crawl jobs");
                    return true;
                }
                Ok(count) => {
                    warn!(count, "failed over crawl jobs orphaned by a worker restart");
                    return true;
                }
                Err(e) => {
                    error!(error = %e, "recovery sweep failed, retrying");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Claim, run and reconcile at most one job.
    ///
    /// Returns `Ok(Some(_))` when a job was processed, `Ok(None)` when the
    /// queue was empty. Only a failed claim is an error; job failures end up
    /// in the returned [`Completion`].
    pub async fn poll_once(&self) -> Result<Option<Completion>> {
        let Some(job) = self.store.claim_next(&self.config.worker_id).await? else {
            return Ok(None);
        };

        Ok(Some(self.process_job(job).await))
    }

    async fn process_job(&self, job: CrawlJob) -> Completion {
        info!(
            job_id = %job.job_id,
            worker_id = %self.config.worker_id,
            "claimed crawl job"
        );

        let outcome = self.runner.run(&job).await;
        reconcile(self.store.as_ref(), &job, &outcome).await
    }

    /// Recovery sweep, then the poll loop until `shutdown` is cancelled.
    ///
    /// Shutdown is observed while idle and between jobs. A running crawler is
    /// always awaited and reconciled.
    pub async fn run_until_cancelled(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            jobs_root = %self.runner.settings().jobs_root.display(),
            "crawl worker starting"
        );

        if !self.recover(&shutdown).await {
            info!(worker_id = %self.config.worker_id, "crawl worker stopped before recovery");
            return Ok(());
        }

        while !shutdown.is_cancelled() {
            let idle = match self.poll_once().await {
                Ok(processed) => processed.is_none(),
                Err(e) => {
                    error!(error = %e, "failed to claim crawl job");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "crawl worker stopped");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Service for JobWorker {
    fn name(&self) -> &'static str {
        "crawl-worker"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        self.run_until_cancelled(shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::job::{CrawlDefaults, JobStatus};
    use crate::kernel::jobs::job_store::WORKER_RESTART_MESSAGE;
    use crate::kernel::jobs::runner::RunnerSettings;
    use crate::kernel::jobs::testing::{FakeLauncher, InMemoryJobStore};
    use chrono::Utc;
    use serde_json::json;
    use std::path::Path;

    const POLL: Duration = Duration::from_secs(5);

    fn worker(
        store: Arc<InMemoryJobStore>,
        launcher: Arc<FakeLauncher>,
        root: &Path,
        poll_interval: Duration,
    ) -> Arc<JobWorker> {
        let runner = JobRunner::new(
            store.clone(),
            launcher,
            RunnerSettings {
                jobs_root: root.to_path_buf(),
                defaults: CrawlDefaults::default(),
                job_timeout: None,
            },
        );
        Arc::new(JobWorker::new(
            store,
            runner,
            JobWorkerConfig {
                worker_id: "test-worker".to_string(),
                poll_interval,
            },
        ))
    }

    fn spawn(
        worker: &Arc<JobWorker>,
        shutdown: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let worker = Arc::clone(worker);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run_until_cancelled(shutdown).await })
    }

    async fn wait_for<F>(mut condition: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_config_defaults() {
        let config = JobWorkerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn test_config_with_worker_id() {
        let config = JobWorkerConfig::with_worker_id("my-worker");
        assert_eq!(config.worker_id, "my-worker");
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let launcher = Arc::new(FakeLauncher::gated(0));
        store.insert(CrawlJob::queued("J1", json!({ "maxPages": 10 })));

        let worker = worker(store.clone(), launcher.clone(), root.path(), POLL);
        let shutdown = CancellationToken::new();
        let handle = spawn(&worker, &shutdown);

        // Running with a log path while the crawler is still alive
        wait_for(|| {
            store
                .get("J1")
                .is_some_and(|j| j.status == JobStatus::Running && j.pid.is_some())
        })
        .await;
        let running = store.get("J1").unwrap();
        assert!(running.log_path.is_some());
        assert_eq!(running.locked_by.as_deref(), Some("test-worker"));

        launcher.release();
        wait_for(|| store.get("J1").is_some_and(|j| j.status.is_terminal())).await;

        let done = store.get("J1").unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.exit_code, Some(0));
        assert!(done.pid.is_none());
        assert!(done.ended_at.unwrap() > done.started_at.unwrap());
        assert_eq!(launcher.invocations()[0].max_pages, 10);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_crash_recovery_before_first_claim() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let launcher = Arc::new(FakeLauncher::exiting(0));

        let mut orphan = CrawlJob::queued("J2", json!({}));
        orphan.status = JobStatus::Running;
        orphan.started_at = Some(Utc::now());
        orphan.pid = Some(999);
        store.insert(orphan);
        store.insert(CrawlJob::queued("J3", json!({})));

        let worker = worker(store.clone(), launcher.clone(), root.path(), POLL);
        let shutdown = CancellationToken::new();
        let handle = spawn(&worker, &shutdown);

        wait_for(|| store.get("J3").is_some_and(|j| j.status.is_terminal())).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let j2 = store.get("J2").unwrap();
        let j3 = store.get("J3").unwrap();
        assert_eq!(j2.status, JobStatus::Failed);
        assert_eq!(j2.error_message.as_deref(), Some(WORKER_RESTART_MESSAGE));
        assert!(j2.pid.is_none());
        assert!(j2.ended_at.unwrap() <= j3.started_at.unwrap());
        assert_eq!(j3.status, JobStatus::Done);
        assert_eq!(launcher.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_recovery_sweep_leaves_other_statuses() {
        let store = InMemoryJobStore::new();
        for i in 0..3 {
            let mut job = CrawlJob::queued(format!("running-{i}"), json!({}));
            job.status = JobStatus::Running;
            store.insert(job);
        }
        let mut done = CrawlJob::queued("done", json!({}));
        done.status = JobStatus::Done;
        done.exit_code = Some(0);
        store.insert(done);
        store.insert(CrawlJob::queued("queued", json!({})));

        assert_eq!(store.fail_orphaned().await.unwrap(), 3);
        assert_eq!(store.fail_orphaned().await.unwrap(), 0);

        for i in 0..3 {
            let job = store.get(&format!("running-{i}")).unwrap();
            assert_eq!(job.status, JobStatus::Failed);
            assert!(job.ended_at.is_some());
            assert_eq!(job.error_message.as_deref(), Some(WORKER_RESTART_MESSAGE));
        }
        let done = store.get("done").unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert!(done.error_message.is_none());
        assert_eq!(store.get("queued").unwrap().status, JobStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_claims_respect_poll_interval() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let worker = worker(
            store.clone(),
            Arc::new(FakeLauncher::exiting(0)),
            root.path(),
            POLL,
        );
        let shutdown = CancellationToken::new();
        let handle = spawn(&worker, &shutdown);

        tokio::time::sleep(Duration::from_secs(16)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let attempts = store.claim_attempts();
        assert!(attempts.len() >= 3, "only {} claim attempts", attempts.len());
        for pair in attempts.windows(2) {
            assert!(pair[1] - pair[0] >= POLL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_claim_until_recovery_succeeds() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        store.fail_next_sweeps(2);
        let start = tokio::time::Instant::now();

        let worker = worker(
            store.clone(),
            Arc::new(FakeLauncher::exiting(0)),
            root.path(),
            POLL,
        );
        let shutdown = CancellationToken::new();
        let handle = spawn(&worker, &shutdown);

        tokio::time::sleep(Duration::from_secs(12)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let attempts = store.claim_attempts();
        assert!(!attempts.is_empty());
        assert!(attempts[0] - start >= POLL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_failure_does_not_stop_worker() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        store.set_fail_claims(true);
        store.insert(CrawlJob::queued("J1", json!({})));

        let worker = worker(
            store.clone(),
            Arc::new(FakeLauncher::exiting(0)),
            root.path(),
            POLL,
        );
        let shutdown = CancellationToken::new();
        let handle = spawn(&worker, &shutdown);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.get("J1").unwrap().status, JobStatus::Queued);
        assert!(store.claim_attempts().len() >= 2);

        store.set_fail_claims(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        wait_for(|| store.get("J1").is_some_and(|j| j.status.is_terminal())).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(store.get("J1").unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_bad_job_does_not_stop_worker() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let mut bad = CrawlJob::queued("../bad", json!({}));
        bad.created_at = Utc::now() - chrono::Duration::seconds(1);
        store.insert(bad);
        store.insert(CrawlJob::queued("good", json!({})));

        let worker = worker(
            store.clone(),
            Arc::new(FakeLauncher::exiting(0)),
            root.path(),
            POLL,
        );

        let first = worker.poll_once().await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Failed);
        assert_eq!(first.exit_code, -1);

        let second = worker.poll_once().await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Done);

        assert!(worker.poll_once().await.unwrap().is_none());

        let bad = store.get("../bad").unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        assert!(bad.error_message.unwrap().contains("invalid job id"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed_with_code() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        store.insert(CrawlJob::queued("J7", json!({})));
        let worker = worker(
            store.clone(),
            Arc::new(FakeLauncher::exiting(7)),
            root.path(),
            POLL,
        );

        worker.poll_once().await.unwrap();

        let job = store.get("J7").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.exit_code, Some(7));
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn test_signaled_crawler_is_failed_without_exit_code() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        store.insert(CrawlJob::queued("J9", json!({})));
        let worker = worker(
            store.clone(),
            Arc::new(FakeLauncher::signaled(15)),
            root.path(),
            POLL,
        );

        worker.poll_once().await.unwrap();

        let job = store.get("J9").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.exit_code, Some(-1));
        assert_eq!(
            job.error_message.as_deref(),
            Some("crawler terminated by signal 15")
        );
        assert!(job.pid.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let worker = worker(
            store,
            Arc::new(FakeLauncher::exiting(0)),
            root.path(),
            Duration::from_secs(3600),
        );
        let shutdown = CancellationToken::new();
        let handle = spawn(&worker, &shutdown);

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();
    }
}
