//! Pipeline orchestrator: ties source → mapper → storage → progress together.
//!
//! ## Run shape
//!
//! `run()` walks the deterministic product of teams (outer) × stat types
//! (inner), strictly sequentially:
//!   1. Discover teams from the standings page
//!   2. For each unit not already complete: rate-limited fetch → extract →
//!      map → upsert → snapshot → mark complete, inside a bounded retry loop
//!   Idempotent: a re-run skips completed units and upserts change nothing.
//!
//! A unit that exhausts its attempts stays incomplete with its error history
//! in the progress file; the run continues. Killing the process at any point
//! is safe, the next run resumes from the progress file.

use crate::archive;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::mapping;
use crate::models::{Team, WorkUnit};
use crate::progress::ProgressStore;
use crate::scraper::{matchlog_url, MatchlogScraper, StatSource};
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    /// Re-fetch units even when the progress file says they are complete.
    pub force: bool,
    /// Restrict to these team ids.
    pub teams: Option<Vec<String>>,
    /// Restrict to these stat types.
    pub stats: Option<Vec<String>>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub total_units: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub records_upserted: usize,
}

enum UnitOutcome {
    Completed(usize),
    Failed,
}

pub struct Orchestrator<S: StatSource> {
    config: AppConfig,
    source: S,
    repo: Repository,
    progress: ProgressStore,
    options: RunOptions,
}

impl Orchestrator<MatchlogScraper> {
    /// Wire up the production pipeline from configuration.
    pub fn from_config(config: AppConfig, options: RunOptions) -> Result<Self> {
        let repo = Repository::open(&config.storage.db_path).context("Failed to open DuckDB")?;
        if config.storage.run_migrations {
            repo.run_migrations()?;
        }
        let source = MatchlogScraper::new(&config.scraper).context("Failed to build scraper")?;
        let progress = ProgressStore::load(&config.storage.progress_path);
        Ok(Self::new(config, source, repo, progress, options))
    }
}

impl<S: StatSource> Orchestrator<S> {
    pub fn new(
        config: AppConfig,
        source: S,
        repo: Repository,
        progress: ProgressStore,
        options: RunOptions,
    ) -> Self {
        Self { config, source, repo, progress, options }
    }

    pub async fn run(&mut self) -> Result<RunSummary> {
        // ── 1. Team discovery ─────────────────────────────────────────────
        info!("=== Step 1: Discovering teams ===");
        let mut teams: Vec<Team> = self
            .source
            .fetch_team_list()
            .await
            .context("Team discovery failed")?;

        if let Some(filter) = &self.options.teams {
            teams.retain(|t| filter.iter().any(|f| f == &t.id));
        }
        // Stable order so an interrupted run resumes from a predictable point
        teams.sort_by(|a, b| a.id.cmp(&b.id));

        let stat_types: Vec<String> = self
            .config
            .pipeline
            .stat_types
            .iter()
            .filter(|s| {
                self.options
                    .stats
                    .as_ref()
                    .map(|f| f.iter().any(|x| x == *s))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        let mut summary = RunSummary {
            total_units: teams.len() * stat_types.len(),
            ..Default::default()
        };
        info!(
            "=== Step 2: {} teams × {} stat types = {} units ===",
            teams.len(),
            stat_types.len(),
            summary.total_units
        );

        let run_id = self.repo.begin_scrape_run().unwrap_or(0);

        // ── 2. Work the units ─────────────────────────────────────────────
        for (t_idx, team) in teams.iter().enumerate() {
            let mut batch_did_work = false;

            for stat_type in &stat_types {
                if !self.options.force && self.progress.is_complete(&team.id, stat_type) {
                    debug!("{}/{}: already complete, skipping", team.id, stat_type);
                    summary.skipped += 1;
                    continue;
                }

                batch_did_work = true;
                let unit = WorkUnit {
                    team_id: team.id.clone(),
                    team_name: team.name.clone(),
                    stat_type: stat_type.clone(),
                    url: matchlog_url(
                        &self.config.scraper.base_url,
                        &team.squad_path,
                        &self.config.scraper.season,
                        stat_type,
                    ),
                };

                match self.process_unit(&unit).await? {
                    UnitOutcome::Completed(n) => {
                        summary.completed += 1;
                        summary.records_upserted += n;
                    }
                    UnitOutcome::Failed => summary.failed += 1,
                }
            }

            if stat_types.iter().all(|s| self.progress.is_complete(&team.id, s)) {
                self.progress.mark_team_complete(&team.id)?;
            }

            // Aggregate rate budget: pause between per-team stat batches
            if batch_did_work && t_idx + 1 < teams.len() {
                let cooldown = Duration::from_secs(self.config.pipeline.batch_cooldown_secs);
                debug!("Batch cooldown {:?} after {}", cooldown, team.id);
                sleep(cooldown).await;
            }
        }

        // ── 3. Summary ────────────────────────────────────────────────────
        self.repo
            .finish_scrape_run(
                run_id,
                summary.completed + summary.failed,
                summary.records_upserted,
                (summary.failed > 0).then(|| format!("{} units failed", summary.failed)).as_deref(),
            )
            .ok();

        let snap = self.progress.snapshot(summary.total_units);
        info!(
            "=== Done: {}/{} units complete ({:.1}%) | {} skipped | {} failed | {} records ===",
            snap.completed,
            snap.total,
            snap.percentage,
            summary.skipped,
            summary.failed,
            summary.records_upserted,
        );
        for err in self.progress.errors() {
            warn!("  {} / {}: {} ({})", err.team, err.stat, err.error, err.timestamp);
        }

        Ok(summary)
    }

    /// Bounded retry loop for one unit. Progress-file writes must succeed;
    /// resumability is worthless if they silently fail, so those errors
    /// propagate and abort the run.
    async fn process_unit(&mut self, unit: &WorkUnit) -> Result<UnitOutcome> {
        let max_attempts = self.config.pipeline.max_retries.max(1);

        for attempt in 1..=max_attempts {
            match self.attempt_unit(unit).await {
                Ok(n) => {
                    self.progress.mark_complete(&unit.team_id, &unit.stat_type)?;
                    info!("{}/{}: {} records (attempt {})", unit.team_id, unit.stat_type, n, attempt);
                    return Ok(UnitOutcome::Completed(n));
                }
                Err(e) => {
                    warn!(
                        "{}/{} attempt {}/{}: {}",
                        unit.team_id, unit.stat_type, attempt, max_attempts, e
                    );
                    self.progress.record_error(
                        &unit.team_id,
                        &unit.stat_type,
                        &format!("[{}] {}", e.category(), e),
                    )?;

                    if !e.is_retryable() {
                        break;
                    }
                    if attempt < max_attempts {
                        let backoff = Duration::from_secs(self.config.pipeline.retry_backoff_secs);
                        debug!("Backing off {:?} before retry", backoff);
                        sleep(backoff).await;
                    }
                }
            }
        }

        Ok(UnitOutcome::Failed)
    }

    /// One attempt: fetch → extract → map → upsert → snapshot.
    async fn attempt_unit(&mut self, unit: &WorkUnit) -> Result<usize, PipelineError> {
        let pair = self.source.fetch_matchlog(unit).await?;

        let scraped_at = Utc::now().to_rfc3339();
        let records = mapping::transform_tables(
            &pair,
            &unit.stat_type,
            &unit.team_id,
            &self.config.scraper.season,
            &scraped_at,
        )?;

        let stat_mapping = mapping::mapping_for(&unit.stat_type)
            .ok_or_else(|| PipelineError::MappingMismatch(unit.stat_type.clone()))?;

        let n = self.repo.upsert_records(
            &records,
            stat_mapping.target_table,
            stat_mapping.conflict_key,
        )?;

        archive::write_unit_snapshot(
            &self.config.storage.snapshot_dir,
            unit,
            &self.config.scraper.season,
            &scraped_at,
            &records,
        )
        .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        Ok(n)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
