//! Crawler subprocess invocation and launch.
//!
//! [`CrawlerLauncher`] is the seam between the runner and the OS so tests can
//! substitute a fake process without spawning anything.

use std::ffi::OsString;
use std::fs::File;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::error::JobError;
use super::job::{CrawlDefaults, CrawlParams};

/// Fully resolved crawler arguments for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlInvocation {
    pub out_dir: PathBuf,
    pub max_pages: i64,
    pub rate: f64,
    pub start_url: String,
}

impl CrawlInvocation {
    /// Fill absent params from `defaults`.
    pub fn resolve(params: &CrawlParams, defaults: &CrawlDefaults, out_dir: PathBuf) -> Self {
        Self {
            out_dir,
            max_pages: params.max_pages.unwrap_or(defaults.max_pages),
            rate: params.rate.unwrap_or(defaults.rate),
            start_url: params
                .start_url
                .clone()
                .unwrap_or_else(|| defaults.start_url.clone()),
        }
    }

    /// Flags passed after the subcommand.
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "--out".into(),
            self.out_dir.clone().into_os_string(),
            "--max-pages".into(),
            self.max_pages.to_string().into(),
            "--rate".into(),
            self.rate.to_string().into(),
            "--start-url".into(),
            self.start_url.clone().into(),
        ]
    }
}

/// How a crawler process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Code(i32),
    Signal(i32),
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ProcessExit::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ProcessExit::Signal(signal);
            }
        }

        ProcessExit::Code(-1)
    }
}

/// Starts crawler processes.
pub trait CrawlerLauncher: Send + Sync {
    /// Start the crawler with both stdout and stderr written to `log`.
    fn launch(
        &self,
        invocation: &CrawlInvocation,
        log: File,
    ) -> Result<Box<dyn CrawlerProcess>, JobError>;
}

/// Handle on a started crawler.
#[async_trait]
pub trait CrawlerProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit.
    async fn wait(&mut self) -> Result<ProcessExit, JobError>;

    /// Forcefully terminate the process and reap it.
    async fn kill(&mut self) -> Result<(), JobError>;
}

/// Launches the real crawler binary with tokio.
#[derive(Debug, Clone)]
pub struct TokioCrawlerLauncher {
    program: OsString,
    subcommand: Option<String>,
}

impl TokioCrawlerLauncher {
    pub fn new(program: impl Into<OsString>, subcommand: Option<String>) -> Self {
        Self {
            program: program.into(),
            subcommand,
        }
    }

    /// Build the command without spawning it.
    pub fn command(&self, invocation: &CrawlInvocation) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(subcommand) = &self.subcommand {
            cmd.arg(subcommand);
        }
        cmd.args(invocation.args());
        cmd
    }
}

impl CrawlerLauncher for TokioCrawlerLauncher {
    fn launch(
        &self,
        invocation: &CrawlInvocation,
        log: File,
    ) -> Result<Box<dyn CrawlerProcess>, JobError> {
        // Both streams share one append-mode file description, so writes
        // interleave in the order the crawler makes them.
        let stderr = log.try_clone().map_err(JobError::Setup)?;

        let child = self
            .command(invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(JobError::Spawn)?;

        Ok(Box::new(TokioCrawlerProcess { child }))
    }
}

struct TokioCrawlerProcess {
    child: Child,
}

#[async_trait]
impl CrawlerProcess for TokioCrawlerProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<ProcessExit, JobError> {
        let status = self.child.wait().await.map_err(JobError::Wait)?;
        Ok(status.into())
    }

    async fn kill(&mut self) -> Result<(), JobError> {
        self.child.kill().await.map_err(JobError::Wait)
    }
}
