use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::kernel::jobs::{CrawlDefaults, JobWorkerConfig, RunnerSettings};

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jobs_root: PathBuf,
    pub crawler_program: String,
    pub crawler_subcommand: Option<String>,
    pub defaults: CrawlDefaults,
    pub poll_interval: Duration,
    pub job_timeout: Option<Duration>,
    pub worker_id: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fallback = CrawlDefaults::default();

        Ok(Self {
            database_url: var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 5)?,
            jobs_root: var("CRAWL_JOBS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/jobs")),
            crawler_program: var("CRAWLER_PROGRAM").unwrap_or_else(|| "crawler".to_string()),
            // An empty value disables the subcommand
            crawler_subcommand: match var("CRAWLER_SUBCOMMAND") {
                Some(s) if s.trim().is_empty() => None,
                Some(s) => Some(s),
                None => Some("crawl".to_string()),
            },
            defaults: CrawlDefaults {
                max_pages: parse_or(&var, "CRAWL_DEFAULT_MAX_PAGES", fallback.max_pages)?,
                rate: parse_or(&var, "CRAWL_DEFAULT_RATE", fallback.rate)?,
                start_url: var("CRAWL_DEFAULT_START_URL").unwrap_or(fallback.start_url),
            },
            poll_interval: Duration::from_secs(parse_or(&var, "POLL_INTERVAL_SECS", 5)?),
            job_timeout: parse_opt::<u64, _>(&var, "JOB_TIMEOUT_SECS")?.map(Duration::from_secs),
            worker_id: var("WORKER_ID").unwrap_or_else(|| format!("worker-{}", Uuid::new_v4())),
        })
    }

    pub fn worker_config(&self) -> JobWorkerConfig {
        JobWorkerConfig {
            worker_id: self.worker_id.clone(),
            poll_interval: self.poll_interval,
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            jobs_root: self.jobs_root.clone(),
            defaults: self.defaults.clone(),
            job_timeout: self.job_timeout,
        }
    }
}

fn parse_opt<T, F>(var: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{name} must be a valid {}", std::any::type_name::<T>()))
        })
        .transpose()
}

fn parse_or<T, F>(var: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(var, name)?.unwrap_or(default))
}
