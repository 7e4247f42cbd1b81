//! Crawl job infrastructure.
//!
//! This module provides everything between the `crawl_jobs` table and the
//! crawler subprocess:
//! - [`PostgresJobStore`] - Claims, enriches and finalizes job rows
//! - [`JobRunner`] - Prepares the job directory and log, supervises the crawler
//! - [`Completion`] - Maps a run outcome onto a terminal job state
//! - [`JobWorker`] - Recovery sweep plus the claim/run/reconcile poll loop
//!
//! # Architecture
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► fail_orphaned (once)
//!     ├─► claim_next ──────────► crawl_jobs (FOR UPDATE SKIP LOCKED)
//!     ├─► JobRunner::run
//!     │       ├─► record_log_path
//!     │       ├─► CrawlerLauncher::launch ──► crawler subprocess
//!     │       └─► record_pid, wait
//!     └─► complete
//! ```

mod completion;
mod error;
mod job;
mod job_store;
mod process;
mod runner;
pub mod testing;
mod worker;

pub use completion::{reconcile, Completion, NO_EXIT_CODE};
pub use error::JobError;
pub use job::{CrawlDefaults, CrawlJob, CrawlParams, JobStatus};
pub use job_store::{JobStore, PostgresJobStore, WORKER_RESTART_MESSAGE};
pub use process::{
    CrawlInvocation, CrawlerLauncher, CrawlerProcess, ProcessExit, TokioCrawlerLauncher,
};
pub use runner::{JobRunner, RunOutcome, RunnerSettings, LOG_FILE_NAME};
pub use worker::{JobWorker, JobWorkerConfig};
