//! Executes one claimed crawl job.
//!
//! ```text
//! JobRunner::run
//!     │
//!     ├─► <jobs_root>/<job_id>/           (create_dir_all)
//!     ├─► <jobs_root>/<job_id>/crawl.log  (create + append)
//!     ├─► store.record_log_path           (before spawn)
//!     ├─► launcher.launch                 (stdout + stderr -> crawl.log)
//!     ├─► store.record_pid
//!     └─► wait (optionally bounded by job_timeout)
//! ```

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::JobError;
use super::job::{CrawlDefaults, CrawlJob};
use super::job_store::JobStore;
use super::process::{CrawlInvocation, CrawlerLauncher, CrawlerProcess, ProcessExit};

/// File name of the combined crawler log inside a job directory.
pub const LOG_FILE_NAME: &str = "crawl.log";

/// Result of running a job, before it is reconciled.
#[derive(Debug)]
pub enum RunOutcome {
    /// The crawler ran and exited with this code.
    Exited(i32),
    /// The crawler could not be prepared, started or awaited.
    Failed(JobError),
}

/// Settings for [`JobRunner`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Directory under which each job gets `<job_id>/`.
    pub jobs_root: PathBuf,
    pub defaults: CrawlDefaults,
    /// Kill the crawler after this long. `None` waits indefinitely.
    pub job_timeout: Option<Duration>,
}

pub struct JobRunner {
    store: Arc<dyn JobStore>,
    launcher: Arc<dyn CrawlerLauncher>,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        launcher: Arc<dyn CrawlerLauncher>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            launcher,
            settings,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Working directory for a job id. Rejects ids that would escape the
    /// jobs root or nest directories.
    pub fn job_dir(&self, job_id: &str) -> Result<PathBuf, JobError> {
        let mut components = Path::new(job_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == job_id => {
                Ok(self.settings.jobs_root.join(name))
            }
            _ => Err(JobError::InvalidJobId(job_id.to_string())),
        }
    }

    /// Run the job to completion. Never returns an error: every failure is
    /// folded into [`RunOutcome::Failed`].
    pub async fn run(&self, job: &CrawlJob) -> RunOutcome {
        match self.try_run(job).await {
            Ok(ProcessExit::Code(code)) => RunOutcome::Exited(code),
            Ok(ProcessExit::Signal(signal)) => RunOutcome::Failed(JobError::Signaled(signal)),
            Err(e) => RunOutcome::Failed(e),
        }
    }

    async fn try_run(&self, job: &CrawlJob) -> Result<ProcessExit, JobError> {
        let job_dir = self.job_dir(&job.job_id)?;
        tokio::fs::create_dir_all(&job_dir)
            .await
            .map_err(JobError::Setup)?;

        let log_path = job_dir.join(LOG_FILE_NAME);
        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(JobError::Setup)?
            .into_std()
            .await;

        self.store
            .record_log_path(job.id, &log_path.to_string_lossy())
            .await
            .map_err(JobError::RecordLogPath)?;

        let params = job.crawl_params()?;
        let invocation = CrawlInvocation::resolve(&params, &self.settings.defaults, job_dir);

        debug!(job_id = %job.job_id, ?invocation, "launching crawler");
        let mut process = self.launcher.launch(&invocation, log)?;

        match process.pid() {
            Some(pid) => {
                info!(job_id = %job.job_id, pid, log_path = %log_path.display(), "crawler started");
                if let Err(e) = self.store.record_pid(job.id, pid).await {
                    warn!(job_id = %job.job_id, pid, error = %e, "failed to record crawler pid");
                }
            }
            None => warn!(job_id = %job.job_id, "crawler exited before its pid was read"),
        }

        self.wait(job, process.as_mut()).await
    }

    async fn wait(
        &self,
        job: &CrawlJob,
        process: &mut dyn CrawlerProcess,
    ) -> Result<ProcessExit, JobError> {
        let Some(limit) = self.settings.job_timeout else {
            return process.wait().await;
        };

        let waited = tokio::time::timeout(limit, process.wait()).await;
        match waited {
            Ok(exit) => exit,
            Err(_) => {
                warn!(job_id = %job.job_id, timeout_secs = limit.as_secs(), "crawler timed out, killing");
                if let Err(e) = process.kill().await {
                    warn!(job_id = %job.job_id, error = %e, "failed to kill timed out crawler");
                }
                Err(JobError::TimedOut(limit))
            }
        }
    }
}
