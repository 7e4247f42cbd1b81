//! Test doubles for the job store and the crawler launcher.
//!
//! [`InMemoryJobStore`] mirrors the guards of the PostgreSQL store (FIFO
//! claim, status-guarded updates, write-once log path) without a database.
//! [`FakeLauncher`] records invocations and hands out scripted processes.

use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::completion::Completion;
use super::error::JobError;
use super::job::{CrawlJob, JobStatus};
use super::job_store::{JobStore, WORKER_RESTART_MESSAGE};
use super::process::{CrawlInvocation, CrawlerLauncher, CrawlerProcess, ProcessExit};

// ============================================================================
// InMemoryJobStore
// ============================================================================

/// In-memory [`JobStore`].
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<Vec<CrawlJob>>,
    claim_attempts: Mutex<Vec<Instant>>,
    fail_claims: AtomicBool,
    fail_sweeps: AtomicUsize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row the way an external producer would.
    pub fn insert(&self, job: CrawlJob) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(job);
    }

    /// Get a job by business id.
    pub fn get(&self, job_id: &str) -> Option<CrawlJob> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|j| j.job_id == job_id)
            .cloned()
    }

    /// Instants at which `claim_next` was called.
    pub fn claim_attempts(&self) -> Vec<Instant> {
        self.claim_attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make every subsequent claim fail with a store error.
    pub fn set_fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` recovery sweeps fail with a store error.
    pub fn fail_next_sweeps(&self, count: usize) {
        self.fail_sweeps.store(count, Ordering::SeqCst);
    }

    fn update_running<F>(&self, id: Uuid, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut CrawlJob) -> Result<()>,
    {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.iter_mut().find(|j| j.id == id && j.status == JobStatus::Running) {
            Some(job) => {
                apply(job)?;
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn fail_orphaned(&self) -> Result<u64> {
        let pending_failures = self.fail_sweeps.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_sweeps.store(pending_failures - 1, Ordering::SeqCst);
            bail!("connection refused");
        }

        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let mut count = 0;
        for job in jobs
            .iter_mut()
            .filter(|j| j.status.can_transition_to(JobStatus::Failed))
        {
            job.status = JobStatus::Failed;
            job.ended_at = Some(now);
            job.pid = None;
            job.error_message = Some(WORKER_RESTART_MESSAGE.to_string());
            job.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<CrawlJob>> {
        self.claim_attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Instant::now());

        if self.fail_claims.load(Ordering::SeqCst) {
            bail!("connection reset by peer");
        }

        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let Some(job) = jobs
            .iter_mut()
            .filter(|j| j.status.can_transition_to(JobStatus::Running))
            .min_by_key(|j| j.created_at)
        else {
            return Ok(None);
        };

        let now = Utc::now();
        job.status = JobStatus::Running;
        job.locked_at = Some(now);
        job.locked_by = Some(worker_id.to_string());
        job.started_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn record_log_path(&self, id: Uuid, log_path: &str) -> Result<()> {
        let updated = self.update_running(id, |job| {
            if let Some(existing) = &job.log_path {
                if existing != log_path {
                    return Err(anyhow!("log path already recorded as {existing}"));
                }
            }
            job.log_path = Some(log_path.to_string());
            Ok(())
        })?;

        if !updated {
            bail!("job {id} is not running");
        }
        Ok(())
    }

    async fn record_pid(&self, id: Uuid, pid: u32) -> Result<()> {
        let pid = i32::try_from(pid)?;
        let updated = self.update_running(id, |job| {
            job.pid = Some(pid);
            Ok(())
        })?;

        if !updated {
            bail!("job {id} is not running");
        }
        Ok(())
    }

    async fn complete(&self, id: Uuid, completion: &Completion) -> Result<bool> {
        if !JobStatus::Running.can_transition_to(completion.status) {
            bail!("{:?} is not a terminal status", completion.status);
        }

        self.update_running(id, |job| {
            job.status = completion.status;
            job.exit_code = Some(completion.exit_code);
            job.error_message = completion.error_message.clone();
            job.ended_at = Some(Utc::now());
            job.pid = None;
            Ok(())
        })
    }

    async fn find(&self, id: Uuid) -> Result<Option<CrawlJob>> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|j| j.id == id)
            .cloned())
    }
}

// ============================================================================
// FakeLauncher
// ============================================================================

enum Script {
    Exit(ProcessExit),
    SpawnError(String),
}

/// [`CrawlerLauncher`] that never spawns anything.
pub struct FakeLauncher {
    script: Script,
    gate: Option<Arc<Notify>>,
    invocations: Mutex<Vec<CrawlInvocation>>,
    kills: Arc<AtomicUsize>,
    next_pid: AtomicU32,
}

impl FakeLauncher {
    fn with_script(script: Script, gate: Option<Arc<Notify>>) -> Self {
        Self {
            script,
            gate,
            invocations: Mutex::new(Vec::new()),
            kills: Arc::new(AtomicUsize::new(0)),
            next_pid: AtomicU32::new(4242),
        }
    }

    /// Processes exit immediately with `code`.
    pub fn exiting(code: i32) -> Self {
        Self::with_script(Script::Exit(ProcessExit::Code(code)), None)
    }

    /// Processes exit with `code` only after [`FakeLauncher::release`].
    pub fn gated(code: i32) -> Self {
        Self::with_script(
            Script::Exit(ProcessExit::Code(code)),
            Some(Arc::new(Notify::new())),
        )
    }

    /// Processes are killed by `signal` before producing an exit code.
    pub fn signaled(signal: i32) -> Self {
        Self::with_script(Script::Exit(ProcessExit::Signal(signal)), None)
    }

    /// Launch fails as if the OS refused to create the process.
    pub fn failing_spawn(message: impl Into<String>) -> Self {
        Self::with_script(Script::SpawnError(message.into()), None)
    }

    /// Let one gated process exit.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn invocations(&self) -> Vec<CrawlInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl CrawlerLauncher for FakeLauncher {
    fn launch(
        &self,
        invocation: &CrawlInvocation,
        mut log: File,
    ) -> Result<Box<dyn CrawlerProcess>, JobError> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(invocation.clone());

        let exit = match &self.script {
            Script::Exit(exit) => *exit,
            Script::SpawnError(message) => {
                return Err(JobError::Spawn(std::io::Error::other(message.clone())));
            }
        };

        writeln!(log, "fake crawl of {}", invocation.start_url).map_err(JobError::Setup)?;

        Ok(Box::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            exit,
            gate: self.gate.clone(),
            kills: Arc::clone(&self.kills),
        }))
    }
}

struct FakeProcess {
    pid: u32,
    exit: ProcessExit,
    gate: Option<Arc<Notify>>,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl CrawlerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> Result<ProcessExit, JobError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.exit)
    }

    async fn kill(&mut self) -> Result<(), JobError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
