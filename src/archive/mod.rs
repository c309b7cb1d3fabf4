//! Per-unit JSON snapshots, a durable audit trail independent of DuckDB.

use crate::models::{NormalizedRecord, WorkUnit};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Serialize)]
struct UnitSnapshot<'a> {
    team_id: &'a str,
    stat_type: &'a str,
    season: &'a str,
    scraped_at: &'a str,
    rows: &'a [NormalizedRecord],
}

/// Write the normalized rows for one completed unit to
/// `<dir>/<team>_<stat>.json`, replacing any previous snapshot.
pub fn write_unit_snapshot(
    dir: &Path,
    unit: &WorkUnit,
    season: &str,
    scraped_at: &str,
    rows: &[NormalizedRecord],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Could not create snapshot dir {:?}", dir))?;

    let path = dir.join(format!("{}_{}.json", unit.team_id, unit.stat_type));
    let snapshot = UnitSnapshot {
        team_id: &unit.team_id,
        stat_type: &unit.stat_type,
        season,
        scraped_at,
        rows,
    };

    let body = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(&path, body).with_context(|| format!("Failed to write {:?}", path))?;

    debug!("Snapshot written: {:?} ({} rows)", path, rows.len());
    Ok(path)
}
