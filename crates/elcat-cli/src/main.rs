use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use elcat_storage::{FlightStore, PgFlightStore};
use elcat_sync::sweep::Sweeper;
use elcat_sync::{Pipeline, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "elcat")]
#[command(about = "Empty Leg Catalog command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one scrape-and-consolidate cycle
    Run {
        /// Fetch and normalize only; never touch the store
        #[arg(long)]
        dry_run: bool,
        /// Restrict the cycle to the named sources (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,
    },
    /// Demote flights unseen within the freshness window
    Sweep {
        /// Override the configured window
        #[arg(long)]
        window_hours: Option<i64>,
    },
    /// Apply database migrations
    Migrate,
    /// Run recurring cycles until interrupted
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        dry_run: false,
        sources: Vec::new(),
    }) {
        Commands::Run { dry_run, sources } => {
            let filter = if sources.is_empty() {
                None
            } else {
                Some(sources.as_slice())
            };
            let report = elcat_sync::run_cycle_once_from_env(dry_run, filter).await?;
            // one machine-parsable summary line for external monitoring
            println!("{}", serde_json::to_string(&report)?);
        }
        Commands::Sweep { window_hours } => {
            let config = SyncConfig::from_env();
            config.validate()?;
            let hours = window_hours.unwrap_or(config.freshness_window_hours);
            let url = config
                .database_url
                .context("sweep needs DATABASE_URL; the in-memory store has nothing to demote")?;
            let store: Arc<dyn FlightStore> = Arc::new(PgFlightStore::connect(&url).await?);
            let demoted = Sweeper::new(store).sweep(Duration::hours(hours)).await?;
            println!("swept {demoted} stale flights");
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let url = config
                .database_url
                .context("DATABASE_URL must be set for migrate")?;
            let store = PgFlightStore::connect(&url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            let mut config = SyncConfig::from_env();
            config.scheduler_enabled = true;
            let pipeline = Arc::new(Pipeline::from_config(config, None).await?);
            if let Some(mut scheduler) = pipeline.maybe_build_scheduler().await? {
                scheduler.start().await.context("starting scheduler")?;
                info!("scheduler running; ctrl-c to stop");
                tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                scheduler.shutdown().await.context("stopping scheduler")?;
            }
        }
    }

    Ok(())
}
