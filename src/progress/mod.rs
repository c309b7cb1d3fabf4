//! Durable scrape progress, the resumability backbone.
//!
//! A flat JSON document, read once at startup and rewritten in full on
//! every mutation, so a kill at any point leaves the file consistent with
//! exactly the units that finished. Completion is monotonic: nothing here
//! ever moves a unit from done back to pending. A forced re-scrape is the
//! orchestrator skipping the `is_complete` check, not a state reset.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub team: String,
    pub stat: String,
    pub error: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ProgressFile {
    completed_teams: Vec<String>,
    completed_stats: BTreeMap<String, Vec<String>>,
    last_updated: Option<String>,
    errors: Vec<ErrorEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
}

pub struct ProgressStore {
    path: PathBuf,
    state: ProgressFile,
}

impl ProgressStore {
    /// Load progress from disk. A missing or unparseable file yields an
    /// empty state with a warning; it must never prevent a run.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Corrupt progress file {:?} ({}), starting empty", path, e);
                    ProgressFile::default()
                }
            },
            Err(_) => {
                debug!("No progress file at {:?}, starting empty", path);
                ProgressFile::default()
            }
        };
        Self { path, state }
    }

    pub fn is_complete(&self, team_id: &str, stat_type: &str) -> bool {
        self.state
            .completed_stats
            .get(team_id)
            .map(|stats| stats.iter().any(|s| s == stat_type))
            .unwrap_or(false)
    }

    pub fn mark_complete(&mut self, team_id: &str, stat_type: &str) -> Result<()> {
        let stats = self
            .state
            .completed_stats
            .entry(team_id.to_string())
            .or_default();
        if !stats.iter().any(|s| s == stat_type) {
            stats.push(stat_type.to_string());
        }
        self.flush()
    }

    /// Record that every stat type for a team has completed.
    pub fn mark_team_complete(&mut self, team_id: &str) -> Result<()> {
        if !self.state.completed_teams.iter().any(|t| t == team_id) {
            self.state.completed_teams.push(team_id.to_string());
        }
        self.flush()
    }

    pub fn record_error(&mut self, team_id: &str, stat_type: &str, message: &str) -> Result<()> {
        self.state.errors.push(ErrorEvent {
            team: team_id.to_string(),
            stat: stat_type.to_string(),
            error: message.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        });
        self.flush()
    }

    pub fn errors(&self) -> &[ErrorEvent] {
        &self.state.errors
    }

    pub fn completed_teams(&self) -> &[String] {
        &self.state.completed_teams
    }

    pub fn completed_units(&self) -> usize {
        self.state.completed_stats.values().map(|v| v.len()).sum()
    }

    pub fn snapshot(&self, total: usize) -> ProgressSnapshot {
        let completed = self.completed_units();
        let percentage = if total == 0 {
            0.0
        } else {
            completed as f64 * 100.0 / total as f64
        };
        ProgressSnapshot {
            completed,
            total,
            percentage,
        }
    }

    /// Rewrite the whole file. Temp file + rename so a crash mid-write
    /// leaves the previous version intact.
    fn flush(&mut self) -> Result<()> {
        self.state.last_updated = Some(Utc::now().to_rfc3339());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Could not create dir {:?}", parent))?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("Failed to write progress temp file {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace progress file {:?}", self.path))?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ProgressStore {
        ProgressStore::load(dir.path().join("progress.json"))
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(!store.is_complete("arsenal", "shooting"));
        assert_eq!(store.completed_units(), 0);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = ProgressStore::load(&path);
        assert_eq!(store.completed_units(), 0);
    }

    #[test]
    fn test_completion_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        {
            let mut store = ProgressStore::load(&path);
            store.mark_complete("arsenal", "shooting").unwrap();
            store.mark_complete("arsenal", "passing").unwrap();
            store.mark_complete("everton", "shooting").unwrap();
        }
        let store = ProgressStore::load(&path);
        assert!(store.is_complete("arsenal", "shooting"));
        assert!(store.is_complete("arsenal", "passing"));
        assert!(store.is_complete("everton", "shooting"));
        assert!(!store.is_complete("everton", "passing"));
        assert_eq!(store.completed_units(), 3);
    }

    #[test]
    fn test_mark_complete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.mark_complete("arsenal", "shooting").unwrap();
        store.mark_complete("arsenal", "shooting").unwrap();
        assert_eq!(store.completed_units(), 1);
    }

    #[test]
    fn test_errors_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        {
            let mut store = ProgressStore::load(&path);
            store
                .record_error("arsenal", "shooting", "[network] connection reset")
                .unwrap();
        }
        let store = ProgressStore::load(&path);
        assert_eq!(store.errors().len(), 1);
        assert_eq!(store.errors()[0].team, "arsenal");
        assert!(!store.errors()[0].timestamp.is_empty());
    }

    #[test]
    fn test_snapshot_percentage() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.mark_complete("arsenal", "shooting").unwrap();
        store.mark_complete("arsenal", "passing").unwrap();
        let snap = store.snapshot(8);
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.total, 8);
        assert!((snap.percentage - 25.0).abs() < f64::EPSILON);

        // Zero total never divides by zero
        assert_eq!(store.snapshot(0).percentage, 0.0);
    }

    #[test]
    fn test_file_shape_matches_contract() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let mut store = ProgressStore::load(&path);
        store.mark_complete("arsenal", "shooting").unwrap();
        store.mark_team_complete("arsenal").unwrap();
        store.record_error("everton", "misc", "[http] HTTP status 429").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(doc["completedTeams"].as_array().unwrap().contains(&"arsenal".into()));
        assert_eq!(doc["completedStats"]["arsenal"][0], "shooting");
        assert!(doc["lastUpdated"].as_str().is_some());
        assert_eq!(doc["errors"][0]["stat"], "misc");
    }
}
