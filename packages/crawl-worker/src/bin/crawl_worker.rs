//! Crawl worker entry point.
//!
//! `crawl-worker run` (the default) connects to the database, applies
//! migrations and runs the worker until Ctrl-C / SIGTERM.
//! `crawl-worker migrate` only applies migrations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crawl_worker::kernel::jobs::{JobRunner, JobWorker, PostgresJobStore, TokioCrawlerLauncher};
use crawl_worker::kernel::ServiceHost;
use crawl_worker::Config;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "crawl-worker")]
#[command(about = "Claims queued crawl jobs and supervises the crawler subprocess")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker (default)
    Run {
        /// Worker ID recorded on claimed jobs (overrides WORKER_ID)
        #[arg(long)]
        worker_id: Option<String>,

        /// Root directory for per-job working directories (overrides CRAWL_JOBS_ROOT)
        #[arg(long)]
        jobs_root: Option<PathBuf>,
    },

    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crawl_worker=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::from_env().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run {
        worker_id: None,
        jobs_root: None,
    }) {
        Commands::Migrate => {
            let pool = connect(&config).await?;
            migrate(&pool).await
        }
        Commands::Run {
            worker_id,
            jobs_root,
        } => {
            if let Some(worker_id) = worker_id {
                config.worker_id = worker_id;
            }
            if let Some(jobs_root) = jobs_root {
                config.jobs_root = jobs_root;
            }
            run(config).await
        }
    }
}

async fn connect(config: &Config) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");
    Ok(pool)
}

async fn migrate(pool: &PgPool) -> Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");
    Ok(())
}

async fn run(mut config: Config) -> Result<()> {
    tokio::fs::create_dir_all(&config.jobs_root)
        .await
        .with_context(|| format!("Failed to create jobs root {}", config.jobs_root.display()))?;
    // Absolute so recorded log paths stay meaningful outside the worker's cwd
    config.jobs_root = tokio::fs::canonicalize(&config.jobs_root)
        .await
        .context("Failed to resolve jobs root")?;

    let pool = connect(&config).await?;
    migrate(&pool).await?;

    let store = Arc::new(PostgresJobStore::new(pool));
    let launcher = Arc::new(TokioCrawlerLauncher::new(
        &config.crawler_program,
        config.crawler_subcommand.clone(),
    ));
    let runner = JobRunner::new(store.clone(), launcher, config.runner_settings());
    let worker = JobWorker::new(store, runner, config.worker_config());

    ServiceHost::new()
        .with_service(worker)
        .run_until_shutdown()
        .await
}
