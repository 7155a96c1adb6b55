//! # Source Sync CLI (`ssync`)
//!
//! The `ssync` binary drives the synchronization engine: initializing the
//! metadata store, listing source health, triggering syncs (one source or
//! all), evaluating schedules, and inspecting run history.
//!
//! ## Usage
//!
//! ```bash
//! ssync --config ./config/ssync.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ssync init` | Create the SQLite metadata store and seed sources |
//! | `ssync sources` | List sources with live connector health checks |
//! | `ssync sync <source_id\|all>` | Manually trigger a sync |
//! | `ssync tick` | Evaluate schedules once and run whatever is due |
//! | `ssync runs` | Show recent run history |

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use source_sync::config::{self, Config};
use source_sync::connector::ConnectorRegistry;
use source_sync::db;
use source_sync::executor::RunExecutor;
use source_sync::migrate;
use source_sync::models::SyncMode;
use source_sync::pipeline::{PipelineCoordinator, PipelineRunSummary, PipelineTrigger};
use source_sync::runs;
use source_sync::scheduler::Scheduler;
use source_sync::sink::LogSink;
use source_sync::sources;
use source_sync::store::Store;

/// Source Sync — a connector-driven data source synchronization engine.
#[derive(Parser)]
#[command(
    name = "ssync",
    about = "Source Sync — a connector-driven data source synchronization engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ssync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the metadata store.
    ///
    /// Creates the SQLite database, runs schema migrations, and seeds
    /// source configs and schedules from the config file. Idempotent.
    Init,

    /// List sources and their connector health.
    Sources,

    /// Manually trigger a sync for one source or for all enabled sources.
    ///
    /// `ssync sync all` routes through the pipeline coordinator; a single
    /// source id dispatches that source directly. Sources whose previous
    /// run is still in flight are skipped.
    Sync {
        /// Source id, or `all`.
        source: String,

        /// Override the configured sync mode for this run.
        #[arg(long, value_parser = parse_mode)]
        mode: Option<SyncMode>,
    },

    /// Evaluate schedules once and run every due source.
    Tick,

    /// Show recent run history, newest first.
    Runs {
        /// Only show runs for this source.
        #[arg(long)]
        source: Option<String>,

        /// Maximum number of runs to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

fn parse_mode(s: &str) -> Result<SyncMode, String> {
    match s {
        "full" => Ok(SyncMode::Full),
        "incremental" => Ok(SyncMode::Incremental),
        other => Err(format!(
            "invalid mode '{}': expected 'full' or 'incremental'",
            other
        )),
    }
}

async fn build_scheduler(config: &Config) -> Result<(Store, Arc<Scheduler>)> {
    let pool = db::connect(config).await?;
    let store = Store::new(pool);
    store.seed_sources(config, Utc::now()).await?;

    let registry = Arc::new(ConnectorRegistry::with_builtins());
    let executor = Arc::new(RunExecutor::new(
        store.clone(),
        registry,
        Arc::new(LogSink),
        config.engine.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        executor,
        config.engine.clone(),
    ));
    Ok((store, scheduler))
}

fn print_summary(summary: &PipelineRunSummary) {
    println!("pipeline pass");
    println!("  sources attempted: {}", summary.sources_attempted);
    println!("  succeeded: {}", summary.sources_succeeded);
    println!("  failed: {}", summary.sources_failed);
    if summary.sources_cancelled > 0 {
        println!("  cancelled: {}", summary.sources_cancelled);
    }
    println!("  records processed: {}", summary.records_processed);
    println!("  records skipped: {}", summary.records_skipped);
    println!("  records failed: {}", summary.records_failed);
    for (source_id, error) in &summary.errors {
        println!("  error [{}]: {}", source_id, error);
    }
    println!("ok");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let store = Store::new(pool);
            store.seed_sources(&cfg, Utc::now()).await?;
            println!("Metadata store initialized successfully.");
        }
        Commands::Sources => {
            let registry = ConnectorRegistry::with_builtins();
            sources::list_sources(&cfg, &registry).await?;
        }
        Commands::Sync { source, mode } => {
            let (store, scheduler) = build_scheduler(&cfg).await?;
            if source == "all" {
                let coordinator = PipelineCoordinator::new(store, scheduler);
                let summary = coordinator.run(PipelineTrigger::ManualAll, Utc::now()).await?;
                print_summary(&summary);
            } else {
                match scheduler.run_now(&source, mode).await? {
                    Some(run) => {
                        println!("sync {}", source);
                        println!("  status: {}", run.status.as_str());
                        println!("  processed: {}", run.records_processed);
                        println!("  skipped: {}", run.records_skipped);
                        println!("  failed: {}", run.records_failed);
                        println!("  quality: {:.3}", run.data_quality_score);
                        if let Some(watermark) = &run.last_watermark {
                            println!("  watermark: {}", watermark);
                        }
                        if let Some(error) = &run.error {
                            println!("  error: {}", error);
                        }
                        println!("ok");
                    }
                    None => {
                        println!("sync {}: a run is already in flight; skipped", source);
                    }
                }
            }
        }
        Commands::Tick => {
            let (store, scheduler) = build_scheduler(&cfg).await?;
            let coordinator = PipelineCoordinator::new(store, scheduler);
            let summary = coordinator.run(PipelineTrigger::Scheduled, Utc::now()).await?;
            print_summary(&summary);
        }
        Commands::Runs { source, limit } => {
            runs::list_runs(&cfg, source.as_deref(), limit).await?;
        }
    }

    Ok(())
}
