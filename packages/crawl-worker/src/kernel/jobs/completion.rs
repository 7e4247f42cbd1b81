//! Mapping a crawler run onto a terminal job state.

use tracing::{error, info, warn};

use super::job::{CrawlJob, JobStatus};
use super::job_store::JobStore;
use super::runner::RunOutcome;

/// Exit code recorded when the crawler never produced one.
pub const NO_EXIT_CODE: i32 = -1;

/// Terminal state to apply to a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: JobStatus,
    pub exit_code: i32,
    pub error_message: Option<String>,
}

impl Completion {
    /// Exit code 0 is `done`; any other code is `failed` with that code; an
    /// error before or while running is `failed` with code -1 and the error's
    /// message.
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Exited(0) => Self {
                status: JobStatus::Done,
                exit_code: 0,
                error_message: None,
            },
            RunOutcome::Exited(code) => Self {
                status: JobStatus::Failed,
                exit_code: *code,
                error_message: None,
            },
            RunOutcome::Failed(err) => Self {
                status: JobStatus::Failed,
                exit_code: NO_EXIT_CODE,
                error_message: Some(err.to_string()),
            },
        }
    }
}

/// Apply a run outcome to the job record.
///
/// Store errors are logged, not returned: the row stays `running` and is
/// failed over by the next recovery sweep.
pub async fn reconcile(store: &dyn JobStore, job: &CrawlJob, outcome: &RunOutcome) -> Completion {
    let completion = Completion::from_outcome(outcome);

    match store.complete(job.id, &completion).await {
        Ok(true) => match completion.status {
            JobStatus::Done => info!(job_id = %job.job_id, "crawl job done"),
            _ => warn!(
                job_id = %job.job_id,
                exit_code = completion.exit_code,
                error = completion.error_message.as_deref().unwrap_or(""),
                "crawl job failed"
            ),
        },
        Ok(false) => warn!(
            job_id = %job.job_id,
            "crawl job was no longer running, completion not applied"
        ),
        Err(e) => error!(
            job_id = %job.job_id,
            error = %e,
            "failed to record crawl job completion"
        ),
    }

    completion
}
