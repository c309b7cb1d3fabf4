use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Work units ────────────────────────────────────────────────────────────────

/// A team as discovered on the league standings page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Team {
    /// URL-derived slug, e.g. "arsenal". Stable across runs.
    pub id: String,
    pub name: String,
    /// Squad page path as linked from the standings table,
    /// e.g. "/en/squads/18bb7c10/Arsenal-Stats".
    pub squad_path: String,
}

/// One atomic acquisition task: a (team, stat type) pair plus the page it
/// lives on. Immutable once generated for a run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkUnit {
    pub team_id: String,
    pub team_name: String,
    pub stat_type: String,
    pub url: String,
}

// ── Raw extraction results ────────────────────────────────────────────────────

/// A single table cell: visible text plus the href of the first anchor, if
/// the cell links anywhere.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct RawCell {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl RawCell {
    pub fn text(s: impl Into<String>) -> Self {
        Self { text: s.into(), link: None }
    }
}

/// Ordered headers + rows as extracted from a single HTML table.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawCell>>,
}

/// Extraction output for one matchlog page: the team-perspective table and,
/// when present, the opponent-perspective table whose rows correspond
/// positionally (row i of each side describes the same match).
#[derive(Debug, Clone, PartialEq)]
pub struct TablePair {
    pub team: RawTable,
    pub opponent: Option<RawTable>,
}

// ── Normalized records ────────────────────────────────────────────────────────

/// A typed cell value after coercion.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum NormalizedValue {
    Number(f64),
    /// A percentage expressed as a fraction in [0, 1].
    Fraction(f64),
    /// ISO date string, passed through unchanged.
    Date(String),
    Text(String),
    Null,
}

impl NormalizedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NormalizedValue::Date(s) | NormalizedValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Flat target-column → value map, store-ready. Always carries the identity
/// fields `record_id`, `team_id` and `season`.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(transparent)]
pub struct NormalizedRecord {
    pub fields: BTreeMap<String, NormalizedValue>,
}

impl NormalizedRecord {
    pub fn set(&mut self, column: impl Into<String>, value: NormalizedValue) {
        self.fields.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&NormalizedValue> {
        self.fields.get(column)
    }
}

// ── Odds API entities ─────────────────────────────────────────────────────────

/// An upcoming or live event with all bookmaker odds attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsEvent {
    pub id: String,
    #[serde(default)]
    pub sport_key: String,
    #[serde(default)]
    pub commence_time: String,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmaker {
    #[serde(default)]
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub markets: Vec<Market>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub key: String,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    pub price: f64,
    pub point: Option<f64>,
}

/// Best available price for one outcome of one market, across bookmakers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BestPrice {
    pub market: String,
    pub outcome: String,
    pub price: f64,
    pub bookmaker: String,
}

/// A finished event from the scores endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreEvent {
    pub id: String,
    #[serde(default)]
    pub completed: bool,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub scores: Option<Vec<TeamScore>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamScore {
    pub name: String,
    pub score: String,
}
