use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub odds: OddsConfig,
}

/// Stats-site scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the league standings page, relative to `base_url`.
    #[serde(default = "default_standings_path")]
    pub standings_path: String,

    /// Season string used in matchlog URLs and stored on every record.
    #[serde(default = "default_season")]
    pub season: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum spacing between consecutive requests to the stats host.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// 2xx bodies shorter than this are treated as a soft-block.
    #[serde(default = "default_min_body_bytes")]
    pub min_body_bytes: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_progress_path")]
    pub progress_path: PathBuf,

    /// Directory for per-unit JSON snapshots (audit trail).
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Total attempts per work unit before it is left incomplete.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Sleep between failed attempts. Deliberately longer than the
    /// inter-request interval.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Cooldown after each team's stat-type batch.
    #[serde(default = "default_batch_cooldown_secs")]
    pub batch_cooldown_secs: u64,

    /// Stat types scraped per team, in order.
    #[serde(default = "default_stat_types")]
    pub stat_types: Vec<String>,

    /// Exit non-zero when the run finishes with unresolved errors.
    #[serde(default)]
    pub fail_on_errors: bool,
}

/// Odds API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OddsConfig {
    #[serde(default = "default_odds_base_url")]
    pub api_base_url: String,

    /// Supplied via MATCHSTAT__ODDS__API_KEY or .env; never committed.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_sport_key")]
    pub sport_key: String,

    #[serde(default = "default_regions")]
    pub regions: String,

    #[serde(default = "default_markets")]
    pub markets: String,

    /// Spacing between odds API calls. The API is metered, not hostile.
    #[serde(default = "default_odds_interval_secs")]
    pub min_interval_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://fbref.com".to_string()
}
fn default_standings_path() -> String {
    "/en/comps/9/Premier-League-Stats".to_string()
}
fn default_season() -> String {
    "2025-2026".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_min_interval_secs() -> u64 {
    6
}
fn default_jitter_ms() -> u64 {
    750
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
        .to_string()
}
fn default_min_body_bytes() -> usize {
    512
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/matchstat.duckdb")
}
fn default_progress_path() -> PathBuf {
    PathBuf::from("data/progress.json")
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("data/snapshots")
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_secs() -> u64 {
    30
}
fn default_batch_cooldown_secs() -> u64 {
    60
}
fn default_stat_types() -> Vec<String> {
    ["shooting", "passing", "defense", "possession", "keeper", "misc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_odds_base_url() -> String {
    "https://api.the-odds-api.com/v4/sports".to_string()
}
fn default_sport_key() -> String {
    "soccer_epl".to_string()
}
fn default_regions() -> String {
    "uk,eu".to_string()
}
fn default_markets() -> String {
    "h2h,totals".to_string()
}
fn default_odds_interval_secs() -> u64 {
    1
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("MATCHSTAT").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig {
                base_url: default_base_url(),
                standings_path: default_standings_path(),
                season: default_season(),
                timeout_secs: default_timeout_secs(),
                min_interval_secs: default_min_interval_secs(),
                jitter_ms: default_jitter_ms(),
                user_agent: default_user_agent(),
                min_body_bytes: default_min_body_bytes(),
            },
            storage: StorageConfig {
                db_path: default_db_path(),
                progress_path: default_progress_path(),
                snapshot_dir: default_snapshot_dir(),
                run_migrations: true,
            },
            pipeline: PipelineConfig {
                max_retries: default_max_retries(),
                retry_backoff_secs: default_retry_backoff_secs(),
                batch_cooldown_secs: default_batch_cooldown_secs(),
                stat_types: default_stat_types(),
                fail_on_errors: false,
            },
            odds: OddsConfig {
                api_base_url: default_odds_base_url(),
                api_key: String::new(),
                sport_key: default_sport_key(),
                regions: default_regions(),
                markets: default_markets(),
                min_interval_secs: default_odds_interval_secs(),
            },
        }
    }
}
