//! Odds API sync: per-event bookmaker prices plus a best-price summary.
//!
//! Events are created on first sync and updated in place on every later
//! sync until the scores endpoint reports them completed; completion
//! freezes the odds row and settles each market into `market_results`,
//! exactly once.

use crate::config::OddsConfig;
use crate::error::PipelineError;
use crate::models::{BestPrice, OddsEvent, ScoreEvent};
use crate::scraper::http_client::RateLimiter;
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── API client ────────────────────────────────────────────────────────────────

pub struct OddsClient {
    client: reqwest::Client,
    config: OddsConfig,
    limiter: RateLimiter,
    /// Monthly quota as reported by the last response headers.
    requests_remaining: Option<u32>,
    requests_used: Option<u32>,
}

impl OddsClient {
    pub fn new(config: &OddsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build odds API client")?;

        Ok(Self {
            client,
            config: config.clone(),
            limiter: RateLimiter::new(Duration::from_secs(config.min_interval_secs), 0),
            requests_remaining: None,
            requests_used: None,
        })
    }

    pub fn requests_remaining(&self) -> Option<u32> {
        self.requests_remaining
    }

    fn track_quota(&mut self, headers: &reqwest::header::HeaderMap) {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|v| v as u32)
        };
        self.requests_remaining = parse("x-requests-remaining").or(self.requests_remaining);
        self.requests_used = parse("x-requests-used").or(self.requests_used);
        debug!(
            "Odds API quota: {:?} remaining, {:?} used",
            self.requests_remaining, self.requests_used
        );
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &mut self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PipelineError> {
        self.limiter.wait_for_slot("odds-api").await;

        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| PipelineError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatus(status.as_u16()));
        }

        self.track_quota(resp.headers());

        resp.json::<T>()
            .await
            .map_err(|e| PipelineError::Network(e.to_string()))
    }

    /// All priced events for the configured sport.
    pub async fn fetch_events(&mut self) -> Result<Vec<OddsEvent>, PipelineError> {
        let url = format!("{}/{}/odds", self.config.api_base_url, self.config.sport_key);
        let config = self.config.clone();
        self.get_json(
            &url,
            &[
                ("apiKey", config.api_key.as_str()),
                ("regions", config.regions.as_str()),
                ("markets", config.markets.as_str()),
                ("dateFormat", "iso"),
                ("oddsFormat", "decimal"),
            ],
        )
        .await
    }

    /// Recent results, including the completed flag.
    pub async fn fetch_scores(&mut self) -> Result<Vec<ScoreEvent>, PipelineError> {
        let url = format!("{}/{}/scores", self.config.api_base_url, self.config.sport_key);
        let api_key = self.config.api_key.clone();
        self.get_json(
            &url,
            &[("apiKey", api_key.as_str()), ("daysFrom", "3")],
        )
        .await
    }
}

// ── Best-price summary ────────────────────────────────────────────────────────

/// Highest decimal price per (market, outcome) across all bookmakers.
pub fn best_prices(event: &OddsEvent) -> Vec<BestPrice> {
    let mut best: Vec<BestPrice> = Vec::new();

    for bookmaker in &event.bookmakers {
        for market in &bookmaker.markets {
            for outcome in &market.outcomes {
                match best
                    .iter_mut()
                    .find(|b| b.market == market.key && b.outcome == outcome.name)
                {
                    Some(existing) if outcome.price > existing.price => {
                        existing.price = outcome.price;
                        existing.bookmaker = bookmaker.title.clone();
                    }
                    Some(_) => {}
                    None => best.push(BestPrice {
                        market: market.key.clone(),
                        outcome: outcome.name.clone(),
                        price: outcome.price,
                        bookmaker: bookmaker.title.clone(),
                    }),
                }
            }
        }
    }

    best
}

/// Head-to-head settlement from a final score.
fn h2h_outcome(score: &ScoreEvent) -> Option<(String, i64, i64)> {
    let scores = score.scores.as_ref()?;
    let find = |team: &str| {
        scores
            .iter()
            .find(|s| s.name == team)
            .and_then(|s| s.score.trim().parse::<i64>().ok())
    };
    let home = find(&score.home_team)?;
    let away = find(&score.away_team)?;

    let outcome = if home > away {
        score.home_team.clone()
    } else if away > home {
        score.away_team.clone()
    } else {
        "Draw".to_string()
    };
    Some((outcome, home, away))
}

// ── Sync run ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct OddsSyncStats {
    pub events_synced: usize,
    pub results_settled: usize,
    pub errors: usize,
}

pub async fn run_sync(config: &OddsConfig, repo: &Repository) -> Result<OddsSyncStats> {
    if config.api_key.is_empty() {
        anyhow::bail!("Odds API key not configured (set MATCHSTAT__ODDS__API_KEY)");
    }

    let mut client = OddsClient::new(config)?;
    let mut stats = OddsSyncStats::default();
    let now = Utc::now().to_rfc3339();

    // ── 1. Upsert live prices ─────────────────────────────────────────────
    let events = client.fetch_events().await.context("Odds fetch failed")?;
    info!("{} priced events for {}", events.len(), config.sport_key);

    for event in &events {
        let best = best_prices(event);
        match repo.upsert_match_odds(event, &best, &now) {
            Ok(()) => stats.events_synced += 1,
            Err(e) => {
                warn!("{} vs {}: {:#}", event.home_team, event.away_team, e);
                stats.errors += 1;
            }
        }
    }

    // ── 2. Settle completed events ────────────────────────────────────────
    let scores = client.fetch_scores().await.context("Scores fetch failed")?;

    for score in scores.iter().filter(|s| s.completed) {
        if repo.is_event_completed(&score.id).unwrap_or(false) {
            continue;
        }
        let Some((outcome, home, away)) = h2h_outcome(score) else {
            debug!("{}: completed but no parseable score", score.id);
            continue;
        };

        let settled = repo
            .insert_market_result(&score.id, "h2h", &outcome, Some(home), Some(away), &now)
            .and_then(|()| repo.mark_event_completed(&score.id));

        match settled {
            Ok(()) => {
                info!(
                    "Settled {} vs {}: {} ({}-{})",
                    score.home_team, score.away_team, outcome, home, away
                );
                stats.results_settled += 1;
            }
            Err(e) => {
                warn!("Settling {}: {:#}", score.id, e);
                stats.errors += 1;
            }
        }
    }

    if let Some(remaining) = client.requests_remaining() {
        info!("Odds API requests remaining this month: {}", remaining);
    }

    Ok(stats)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bookmaker, Market, Outcome, TeamScore};

    fn bookmaker(title: &str, price_home: f64, price_away: f64) -> Bookmaker {
        Bookmaker {
            key: title.to_lowercase(),
            title: title.to_string(),
            markets: vec![Market {
                key: "h2h".into(),
                outcomes: vec![
                    Outcome { name: "Arsenal".into(), price: price_home, point: None },
                    Outcome { name: "Chelsea".into(), price: price_away, point: None },
                ],
            }],
        }
    }

    #[test]
    fn test_best_prices_picks_max_per_outcome() {
        let event = OddsEvent {
            id: "ev1".into(),
            sport_key: "soccer_epl".into(),
            commence_time: String::new(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            bookmakers: vec![bookmaker("Bet365", 1.8, 4.2), bookmaker("Unibet", 1.95, 4.0)],
        };

        let best = best_prices(&event);
        assert_eq!(best.len(), 2);

        let home = best.iter().find(|b| b.outcome == "Arsenal").unwrap();
        assert_eq!(home.price, 1.95);
        assert_eq!(home.bookmaker, "Unibet");

        let away = best.iter().find(|b| b.outcome == "Chelsea").unwrap();
        assert_eq!(away.price, 4.2);
        assert_eq!(away.bookmaker, "Bet365");
    }

    #[test]
    fn test_h2h_outcome() {
        let score = |home: &str, away: &str| ScoreEvent {
            id: "ev1".into(),
            completed: true,
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            scores: Some(vec![
                TeamScore { name: "Arsenal".into(), score: home.into() },
                TeamScore { name: "Chelsea".into(), score: away.into() },
            ]),
        };

        assert_eq!(h2h_outcome(&score("2", "1")).unwrap().0, "Arsenal");
        assert_eq!(h2h_outcome(&score("0", "3")).unwrap().0, "Chelsea");
        assert_eq!(h2h_outcome(&score("1", "1")).unwrap().0, "Draw");
        assert_eq!(h2h_outcome(&score("x", "1")), None);
    }

    #[test]
    fn test_h2h_outcome_without_scores() {
        let score = ScoreEvent {
            id: "ev1".into(),
            completed: true,
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            scores: None,
        };
        assert_eq!(h2h_outcome(&score), None);
    }
}
