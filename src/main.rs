mod archive;
mod config;
mod error;
mod mapping;
mod models;
mod odds;
mod pipeline;
mod progress;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::{Orchestrator, RunOptions};
use crate::progress::ProgressStore;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "matchstat-etl", about = "Football match-stat and odds ETL", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape matchlog stats for every (team, stat type) unit
    Scrape {
        /// Ignore the progress file and re-fetch completed units
        #[arg(long)]
        force: bool,

        /// Only these team ids (comma-separated slugs)
        #[arg(long, value_delimiter = ',')]
        teams: Option<Vec<String>>,

        /// Only these stat types (comma-separated)
        #[arg(long, value_delimiter = ',')]
        stats: Option<Vec<String>>,
    },

    /// Sync bookmaker odds and settle completed events
    SyncOdds,

    /// Show scrape progress and recorded errors
    Progress,

    /// Show database statistics
    Stats,

    /// Apply schema migrations without scraping
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "matchstat_etl=info,warn",
        1 => "matchstat_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Scrape { force, teams, stats } => {
            let _t = utils::Timer::start("Stat scrape");
            let fail_on_errors = config.pipeline.fail_on_errors;

            let mut orch =
                Orchestrator::from_config(config, RunOptions { force, teams, stats })?;
            let summary = orch.run().await?;

            info!(
                "Done: {} completed, {} skipped, {} failed, {} records",
                summary.completed, summary.skipped, summary.failed, summary.records_upserted
            );

            if fail_on_errors && summary.failed > 0 {
                anyhow::bail!("{} units failed", summary.failed);
            }
        }

        Command::SyncOdds => {
            let _t = utils::Timer::start("Odds sync");
            let repo = Repository::open(&config.storage.db_path)?;
            if config.storage.run_migrations {
                repo.run_migrations()?;
            }

            let stats = odds::run_sync(&config.odds, &repo).await?;
            info!(
                "Done: {} events synced, {} results settled, {} errors",
                stats.events_synced, stats.results_settled, stats.errors
            );
        }

        Command::Progress => {
            let store = ProgressStore::load(&config.storage.progress_path);
            println!("─────────────────────────────────");
            println!("  matchstat-etl : Scrape Progress");
            println!("─────────────────────────────────");
            println!("  Units done    : {}", store.completed_units());
            println!("  Teams done    : {}", store.completed_teams().len());
            println!("  Errors logged : {}", store.errors().len());
            println!("─────────────────────────────────");
            for err in store.errors() {
                println!("  {} / {}: {}", err.team, err.stat, err.error);
            }
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  matchstat-etl : Database Stats");
            println!("─────────────────────────────────");
            for (table, count) in repo.stat_counts()? {
                println!("  {:<24}: {}", table, utils::fmt_number(count));
            }
            println!("  {:<24}: {}", "match_odds", utils::fmt_number(repo.count("match_odds")?));
            println!(
                "  {:<24}: {}",
                "market_results",
                utils::fmt_number(repo.count("market_results")?)
            );
            println!("  From : {}", min.unwrap_or("n/a".into()));
            println!("  To   : {}", max.unwrap_or("n/a".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
