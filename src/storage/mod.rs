use crate::error::PipelineError;
use crate::mapping::{ColType, MAPPINGS};
use crate::models::{BestPrice, NormalizedRecord, NormalizedValue, OddsEvent};
use anyhow::{Context, Result};
use chrono::Utc;
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

/// Stat tables are generated from the mapping registry so the schema can
/// never drift from the field configuration.
fn stat_table_ddl() -> String {
    let mut ddl = String::new();
    for mapping in MAPPINGS {
        ddl.push_str(&format!("CREATE TABLE IF NOT EXISTS {} (\n", mapping.target_table));
        for (col, ty) in mapping.columns() {
            let sql_ty = match ty {
                ColType::Real => "DOUBLE",
                ColType::Text => "VARCHAR",
            };
            ddl.push_str(&format!("    {:<28} {},\n", col, sql_ty));
        }
        ddl.push_str(&format!(
            "    PRIMARY KEY ({})\n);\n",
            mapping.conflict_key.join(", ")
        ));
    }
    ddl
}

const ODDS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS match_odds (
    event_id         VARCHAR PRIMARY KEY,
    sport_key        VARCHAR NOT NULL,
    home_team        VARCHAR NOT NULL,
    away_team        VARCHAR NOT NULL,
    commence_time    VARCHAR,
    bookmaker_prices VARCHAR NOT NULL,
    best_prices      VARCHAR NOT NULL,
    completed        BOOLEAN NOT NULL DEFAULT false,
    first_synced_at  VARCHAR NOT NULL,
    last_synced_at   VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS market_results (
    event_id    VARCHAR NOT NULL,
    market      VARCHAR NOT NULL,
    outcome     VARCHAR NOT NULL,
    home_score  INTEGER,
    away_score  INTEGER,
    settled_at  VARCHAR NOT NULL,
    PRIMARY KEY (event_id, market)
);

CREATE TABLE IF NOT EXISTS scrape_runs (
    id               INTEGER PRIMARY KEY,
    started_at       TIMESTAMP NOT NULL,
    finished_at      TIMESTAMP,
    status           VARCHAR NOT NULL DEFAULT 'running',
    units_processed  INTEGER DEFAULT 0,
    records_upserted INTEGER DEFAULT 0,
    error_msg        VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

fn index_ddl() -> String {
    let mut ddl = String::from(
        "CREATE INDEX IF NOT EXISTS idx_odds_commence ON match_odds (commence_time);\n",
    );
    for mapping in MAPPINGS {
        ddl.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_date ON {t} (match_date);\n",
            t = mapping.target_table
        ));
    }
    ddl
}

// ── Value binding ─────────────────────────────────────────────────────────────

fn bind_value(v: &NormalizedValue) -> Value {
    match v {
        NormalizedValue::Number(n) | NormalizedValue::Fraction(n) => Value::Double(*n),
        NormalizedValue::Date(s) | NormalizedValue::Text(s) => Value::Text(s.clone()),
        NormalizedValue::Null => Value::Null,
    }
}

fn persist_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Persistence(e.to_string())
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn
            .execute_batch(&stat_table_ddl())
            .context("Stat table DDL failed")?;
        self.conn.execute_batch(ODDS_DDL).context("Odds DDL failed")?;
        self.conn
            .execute_batch(&index_ddl())
            .context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Normalized stat records ───────────────────────────────────────────────

    /// Batched upsert into `table` keyed by `conflict_cols`. The whole batch
    /// commits or the whole batch fails; partial success is impossible, so
    /// the orchestrator can retry a failed unit without bookkeeping.
    pub fn upsert_records(
        &self,
        records: &[NormalizedRecord],
        table: &str,
        conflict_cols: &[&str],
    ) -> Result<usize, PipelineError> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction().map_err(persist_err)?;

        for rec in records {
            let cols: Vec<&str> = rec.fields.keys().map(|k| k.as_str()).collect();
            let placeholders = vec!["?"; cols.len()].join(", ");
            let updates = cols
                .iter()
                .filter(|c| !conflict_cols.contains(*c))
                .map(|c| format!("{c} = excluded.{c}"))
                .collect::<Vec<_>>()
                .join(", ");

            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
                table,
                cols.join(", "),
                placeholders,
                conflict_cols.join(", "),
                updates,
            );

            let values: Vec<Value> = rec.fields.values().map(bind_value).collect();
            tx.execute(&sql, params_from_iter(values))
                .map_err(persist_err)?;
        }

        tx.commit().map_err(persist_err)?;
        Ok(records.len())
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        let mut stmt = self.conn.prepare(&format!("SELECT COUNT(*) FROM {}", table))?;
        Ok(stmt.query_row([], |r| r.get(0))?)
    }

    /// Row count per stat table, for the stats view.
    pub fn stat_counts(&self) -> Result<Vec<(String, i64)>> {
        let mut out = Vec::new();
        for mapping in MAPPINGS {
            out.push((mapping.target_table.to_string(), self.count(mapping.target_table)?));
        }
        Ok(out)
    }

    /// Match-date coverage across all stat tables. Dates are ISO strings,
    /// so lexical MIN/MAX is chronological.
    pub fn date_range(&self) -> Result<(Option<String>, Option<String>)> {
        let mut min: Option<String> = None;
        let mut max: Option<String> = None;
        for mapping in MAPPINGS {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT MIN(match_date), MAX(match_date) FROM {}",
                mapping.target_table
            ))?;
            let (lo, hi): (Option<String>, Option<String>) =
                stmt.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            min = match (min, lo) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            max = match (max, hi) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        Ok((min, max))
    }

    // ── Match odds ────────────────────────────────────────────────────────────

    /// Create-on-first-sync, update-in-place thereafter. Rows already marked
    /// completed are frozen: the conditional update leaves them untouched.
    pub fn upsert_match_odds(
        &self,
        event: &OddsEvent,
        best: &[BestPrice],
        now: &str,
    ) -> Result<(), PipelineError> {
        let prices = serde_json::to_string(&event.bookmakers).map_err(persist_err)?;
        let best_json = serde_json::to_string(best).map_err(persist_err)?;

        self.conn
            .execute(
                r#"INSERT INTO match_odds
                       (event_id, sport_key, home_team, away_team, commence_time,
                        bookmaker_prices, best_prices, completed,
                        first_synced_at, last_synced_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, false, ?, ?)
                   ON CONFLICT (event_id) DO UPDATE SET
                       commence_time    = excluded.commence_time,
                       bookmaker_prices = excluded.bookmaker_prices,
                       best_prices      = excluded.best_prices,
                       last_synced_at   = excluded.last_synced_at
                   WHERE match_odds.completed = false"#,
                params![
                    event.id,
                    event.sport_key,
                    event.home_team,
                    event.away_team,
                    event.commence_time,
                    prices,
                    best_json,
                    now,
                    now,
                ],
            )
            .map_err(persist_err)?;
        Ok(())
    }

    pub fn mark_event_completed(&self, event_id: &str) -> Result<(), PipelineError> {
        self.conn
            .execute(
                "UPDATE match_odds SET completed = true WHERE event_id = ?",
                params![event_id],
            )
            .map_err(persist_err)?;
        Ok(())
    }

    pub fn is_event_completed(&self, event_id: &str) -> Result<bool, PipelineError> {
        let mut stmt = self
            .conn
            .prepare("SELECT completed FROM match_odds WHERE event_id = ?")
            .map_err(persist_err)?;
        let completed = stmt
            .query_row(params![event_id], |r| r.get::<_, bool>(0))
            .unwrap_or(false);
        Ok(completed)
    }

    /// Outcome record for a settled market; created once, never updated.
    pub fn insert_market_result(
        &self,
        event_id: &str,
        market: &str,
        outcome: &str,
        home_score: Option<i64>,
        away_score: Option<i64>,
        now: &str,
    ) -> Result<(), PipelineError> {
        self.conn
            .execute(
                r#"INSERT INTO market_results
                       (event_id, market, outcome, home_score, away_score, settled_at)
                   VALUES (?, ?, ?, ?, ?, ?)
                   ON CONFLICT (event_id, market) DO NOTHING"#,
                params![event_id, market, outcome, home_score, away_score, now],
            )
            .map_err(persist_err)?;
        Ok(())
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self) -> Result<i64> {
        let id: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM scrape_runs", [], |r| {
                r.get(0)
            })?;
        self.conn.execute(
            "INSERT INTO scrape_runs (id, started_at, status) VALUES (?, ?, 'running')",
            params![id, Utc::now().naive_utc()],
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        units: usize,
        records: usize,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               units_processed = ?, records_upserted = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                units as i64,
                records as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bookmaker, Market, Outcome};

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn record(goals: f64) -> NormalizedRecord {
        let mut rec = NormalizedRecord::default();
        rec.set("record_id", NormalizedValue::Text("arsenal_2024-03-01_chelsea".into()));
        rec.set("team_id", NormalizedValue::Text("arsenal".into()));
        rec.set("season", NormalizedValue::Text("2025-2026".into()));
        rec.set("scraped_at", NormalizedValue::Text("t0".into()));
        rec.set("match_date", NormalizedValue::Date("2024-03-01".into()));
        rec.set("opponent", NormalizedValue::Text("Chelsea".into()));
        rec.set("goals", NormalizedValue::Number(goals));
        rec.set("shots_on_target_pct", NormalizedValue::Fraction(0.425));
        rec.set("xg", NormalizedValue::Null);
        rec
    }

    const KEY: &[&str] = &["team_id", "match_date", "opponent"];

    fn event(id: &str) -> OddsEvent {
        OddsEvent {
            id: id.into(),
            sport_key: "soccer_epl".into(),
            commence_time: "2024-03-01T15:00:00Z".into(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            bookmakers: vec![Bookmaker {
                key: "bet365".into(),
                title: "Bet365".into(),
                markets: vec![Market {
                    key: "h2h".into(),
                    outcomes: vec![Outcome {
                        name: "Arsenal".into(),
                        price: 1.8,
                        point: None,
                    }],
                }],
            }],
        }
    }

    #[test]
    fn test_migrations_create_all_stat_tables() {
        let repo = repo();
        for mapping in MAPPINGS {
            assert_eq!(repo.count(mapping.target_table).unwrap(), 0);
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let repo = repo();
        let batch = vec![record(2.0)];

        repo.upsert_records(&batch, "team_shooting_stats", KEY).unwrap();
        repo.upsert_records(&batch, "team_shooting_stats", KEY).unwrap();

        assert_eq!(repo.count("team_shooting_stats").unwrap(), 1);
        let goals: f64 = repo
            .conn
            .query_row("SELECT goals FROM team_shooting_stats", [], |r| r.get(0))
            .unwrap();
        assert_eq!(goals, 2.0);
    }

    #[test]
    fn test_conflict_key_second_record_wins() {
        let repo = repo();
        repo.upsert_records(&[record(2.0)], "team_shooting_stats", KEY).unwrap();
        repo.upsert_records(&[record(5.0)], "team_shooting_stats", KEY).unwrap();

        assert_eq!(repo.count("team_shooting_stats").unwrap(), 1);
        let goals: f64 = repo
            .conn
            .query_row("SELECT goals FROM team_shooting_stats", [], |r| r.get(0))
            .unwrap();
        assert_eq!(goals, 5.0);
    }

    #[test]
    fn test_distinct_conflict_keys_insert_rows() {
        let repo = repo();
        let mut other = record(1.0);
        other.set("match_date", NormalizedValue::Date("2024-03-08".into()));
        other.set("record_id", NormalizedValue::Text("arsenal_2024-03-08_chelsea".into()));

        repo.upsert_records(&[record(2.0), other], "team_shooting_stats", KEY).unwrap();
        assert_eq!(repo.count("team_shooting_stats").unwrap(), 2);
    }

    #[test]
    fn test_fraction_stored_as_double() {
        let repo = repo();
        repo.upsert_records(&[record(2.0)], "team_shooting_stats", KEY).unwrap();
        let pct: f64 = repo
            .conn
            .query_row("SELECT shots_on_target_pct FROM team_shooting_stats", [], |r| r.get(0))
            .unwrap();
        assert!((pct - 0.425).abs() < 1e-9);
    }

    #[test]
    fn test_date_range_spans_tables() {
        let repo = repo();
        repo.upsert_records(&[record(2.0)], "team_shooting_stats", KEY).unwrap();
        let (min, max) = repo.date_range().unwrap();
        assert_eq!(min.as_deref(), Some("2024-03-01"));
        assert_eq!(max.as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn test_odds_update_in_place_until_completed() {
        let repo = repo();
        let best = vec![BestPrice {
            market: "h2h".into(),
            outcome: "Arsenal".into(),
            price: 1.8,
            bookmaker: "Bet365".into(),
        }];

        repo.upsert_match_odds(&event("ev1"), &best, "t0").unwrap();
        repo.upsert_match_odds(&event("ev1"), &best, "t1").unwrap();
        assert_eq!(repo.count("match_odds").unwrap(), 1);

        let last: String = repo
            .conn
            .query_row("SELECT last_synced_at FROM match_odds WHERE event_id = 'ev1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(last, "t1");

        // Completion freezes the row
        repo.mark_event_completed("ev1").unwrap();
        repo.upsert_match_odds(&event("ev1"), &best, "t2").unwrap();
        let last: String = repo
            .conn
            .query_row("SELECT last_synced_at FROM match_odds WHERE event_id = 'ev1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(last, "t1");
        assert!(repo.is_event_completed("ev1").unwrap());
    }

    #[test]
    fn test_market_result_created_once() {
        let repo = repo();
        repo.insert_market_result("ev1", "h2h", "Arsenal", Some(2), Some(1), "t0").unwrap();
        repo.insert_market_result("ev1", "h2h", "Chelsea", Some(9), Some(9), "t1").unwrap();

        assert_eq!(repo.count("market_results").unwrap(), 1);
        let outcome: String = repo
            .conn
            .query_row("SELECT outcome FROM market_results WHERE event_id = 'ev1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(outcome, "Arsenal");
    }

    #[test]
    fn test_scrape_run_log() {
        let repo = repo();
        let id = repo.begin_scrape_run().unwrap();
        repo.finish_scrape_run(id, 12, 240, None).unwrap();

        let status: String = repo
            .conn
            .query_row("SELECT status FROM scrape_runs WHERE id = ?", params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "success");
    }
}
