pub mod cleaner;
pub mod extract;
pub mod http_client;

use crate::config::ScraperConfig;
use crate::error::PipelineError;
use crate::models::{TablePair, Team, WorkUnit};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use self::http_client::{HttpClient, RateLimiter};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable acquisition source. The orchestrator only ever talks to this,
/// which keeps the retry and progress machinery testable without a network.
#[async_trait]
pub trait StatSource: Send + Sync {
    async fn fetch_team_list(&self) -> Result<Vec<Team>, PipelineError>;
    async fn fetch_matchlog(&self, unit: &WorkUnit) -> Result<TablePair, PipelineError>;
}

// ── Matchlog URL ──────────────────────────────────────────────────────────────

/// Build the matchlog URL for one (team, stat type) pair.
/// "/en/squads/18bb7c10/Arsenal-Stats" + shooting →
/// "<base>/en/squads/18bb7c10/2025-2026/matchlogs/all_comps/shooting"
pub fn matchlog_url(base_url: &str, squad_path: &str, season: &str, stat_type: &str) -> String {
    // The squad link ends in a display-name segment; the matchlog path is
    // rooted at the squad hash one level up.
    let stem = match squad_path.rfind('/') {
        Some(i) => &squad_path[..i],
        None => squad_path,
    };
    format!(
        "{}{}/{}/matchlogs/all_comps/{}",
        base_url.trim_end_matches('/'),
        stem,
        season,
        stat_type
    )
}

// ── Stats-site scraper ────────────────────────────────────────────────────────

pub struct MatchlogScraper {
    client: HttpClient,
    limiter: RateLimiter,
    base_url: String,
    standings_path: String,
    host_key: String,
}

impl MatchlogScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let host_key = Url::parse(&base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| base_url.clone());

        Ok(Self {
            client: HttpClient::new(config)?,
            limiter: RateLimiter::new(
                Duration::from_secs(config.min_interval_secs),
                config.jitter_ms,
            ),
            base_url,
            standings_path: config.standings_path.clone(),
            host_key,
        })
    }

    fn standings_url(&self) -> String {
        format!("{}{}", self.base_url, self.standings_path)
    }
}

#[async_trait]
impl StatSource for MatchlogScraper {
    async fn fetch_team_list(&self) -> Result<Vec<Team>, PipelineError> {
        let url = self.standings_url();
        info!("Fetching standings page ({})", url);

        self.limiter.wait_for_slot(&self.host_key).await;
        let html = self.client.get_text(&url).await?;

        let teams = extract::parse_team_links(&html);
        if teams.is_empty() {
            return Err(PipelineError::NoTableFound("standings".to_string()));
        }

        info!("Discovered {} teams", teams.len());
        Ok(teams)
    }

    async fn fetch_matchlog(&self, unit: &WorkUnit) -> Result<TablePair, PipelineError> {
        debug!("Fetching matchlog: {}", unit.url);

        self.limiter.wait_for_slot(&self.host_key).await;
        let html = self.client.get_text(&unit.url).await?;

        extract::extract_tables(&html, &unit.stat_type)
    }
}
