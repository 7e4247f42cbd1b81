//! Per-job failures.
//!
//! Every variant ends up as a `failed` row with `exit_code = -1` and the
//! variant's display string as `error_message`. Io-backed variants display
//! the underlying message verbatim.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    /// The job id cannot be used as a directory name.
    #[error("invalid job id {0:?}: must be a single path component")]
    InvalidJobId(String),

    /// The `params` payload does not decode.
    #[error("invalid params: {0}")]
    InvalidParams(#[source] serde_json::Error),

    /// Working directory or log file could not be prepared.
    #[error(transparent)]
    Setup(std::io::Error),

    /// The log path could not be persisted before launch.
    #[error("failed to record log path: {0:#}")]
    RecordLogPath(anyhow::Error),

    /// The OS refused to start the crawler.
    #[error(transparent)]
    Spawn(std::io::Error),

    /// Waiting on the crawler failed.
    #[error(transparent)]
    Wait(std::io::Error),

    /// The crawler exceeded the configured job timeout and was killed.
    #[error("crawler timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    /// The crawler was terminated by a signal and has no exit code.
    #[error("crawler terminated by signal {0}")]
    Signaled(i32),
}
