//! Declarative per-stat-type field mappings.
//!
//! Each stat type owns one [`StatMapping`]: three partitions of raw
//! header → target column pairs (`common` match metadata, `team` stats,
//! `opponent` stats), the target table name and the conflict key the sink
//! upserts against. The mapping is the explicit allow-list: raw columns the
//! upstream adds over time are silently dropped until someone lists them
//! here. Adding a stat type is a data change, not a logic change.

use crate::error::PipelineError;
use crate::models::{NormalizedRecord, NormalizedValue, RawCell, TablePair};
use crate::scraper::cleaner::{coerce_value, record_id};
use tracing::warn;

/// Target column type, used when generating table DDL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColType {
    Real,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Raw column header as served by the upstream.
    pub raw: &'static str,
    /// Target column in the store.
    pub target: &'static str,
    pub ty: ColType,
}

const fn f(raw: &'static str, target: &'static str, ty: ColType) -> FieldDef {
    FieldDef { raw, target, ty }
}

#[derive(Debug)]
pub struct StatMapping {
    pub stat_type: &'static str,
    pub target_table: &'static str,
    /// Composite key that makes repeated upserts idempotent.
    pub conflict_key: &'static [&'static str],
    pub common: &'static [FieldDef],
    pub team: &'static [FieldDef],
    pub opponent: &'static [FieldDef],
}

// ── Shared match metadata ─────────────────────────────────────────────────────

const COMMON: &[FieldDef] = &[
    f("Date", "match_date", ColType::Text),
    f("Comp", "competition", ColType::Text),
    f("Round", "round", ColType::Text),
    f("Venue", "venue", ColType::Text),
    f("Result", "result", ColType::Text),
    f("GF", "goals_for", ColType::Real),
    f("GA", "goals_against", ColType::Real),
    f("Opponent", "opponent", ColType::Text),
];

// ── Shooting ──────────────────────────────────────────────────────────────────

const SHOOTING_TEAM: &[FieldDef] = &[
    f("Gls", "goals", ColType::Real),
    f("Sh", "shots", ColType::Real),
    f("SoT", "shots_on_target", ColType::Real),
    f("SoT%", "shots_on_target_pct", ColType::Real),
    f("G/Sh", "goals_per_shot", ColType::Real),
    f("Dist", "avg_shot_distance", ColType::Real),
    f("PK", "penalties_scored", ColType::Real),
    f("PKatt", "penalties_attempted", ColType::Real),
    f("xG", "xg", ColType::Real),
    f("npxG", "npxg", ColType::Real),
];

const SHOOTING_OPP: &[FieldDef] = &[
    f("Gls", "opp_goals", ColType::Real),
    f("Sh", "opp_shots", ColType::Real),
    f("SoT", "opp_shots_on_target", ColType::Real),
    f("SoT%", "opp_shots_on_target_pct", ColType::Real),
    f("G/Sh", "opp_goals_per_shot", ColType::Real),
    f("Dist", "opp_avg_shot_distance", ColType::Real),
    f("PK", "opp_penalties_scored", ColType::Real),
    f("PKatt", "opp_penalties_attempted", ColType::Real),
    f("xG", "opp_xg", ColType::Real),
    f("npxG", "opp_npxg", ColType::Real),
];

// ── Passing ───────────────────────────────────────────────────────────────────

const PASSING_TEAM: &[FieldDef] = &[
    f("Cmp", "passes_completed", ColType::Real),
    f("Att", "passes_attempted", ColType::Real),
    f("Cmp%", "pass_completion_pct", ColType::Real),
    f("TotDist", "pass_distance", ColType::Real),
    f("PrgDist", "progressive_pass_distance", ColType::Real),
    f("Ast", "assists", ColType::Real),
    f("xAG", "xag", ColType::Real),
    f("KP", "key_passes", ColType::Real),
    f("PPA", "passes_into_penalty_area", ColType::Real),
    f("PrgP", "progressive_passes", ColType::Real),
];

const PASSING_OPP: &[FieldDef] = &[
    f("Cmp", "opp_passes_completed", ColType::Real),
    f("Att", "opp_passes_attempted", ColType::Real),
    f("Cmp%", "opp_pass_completion_pct", ColType::Real),
    f("TotDist", "opp_pass_distance", ColType::Real),
    f("PrgDist", "opp_progressive_pass_distance", ColType::Real),
    f("Ast", "opp_assists", ColType::Real),
    f("xAG", "opp_xag", ColType::Real),
    f("KP", "opp_key_passes", ColType::Real),
    f("PPA", "opp_passes_into_penalty_area", ColType::Real),
    f("PrgP", "opp_progressive_passes", ColType::Real),
];

// ── Defense ───────────────────────────────────────────────────────────────────

const DEFENSE_TEAM: &[FieldDef] = &[
    f("Tkl", "tackles", ColType::Real),
    f("TklW", "tackles_won", ColType::Real),
    f("Int", "interceptions", ColType::Real),
    f("Blocks", "blocks", ColType::Real),
    f("Sh", "shots_blocked", ColType::Real),
    f("Pass", "passes_blocked", ColType::Real),
    f("Clr", "clearances", ColType::Real),
    f("Err", "errors", ColType::Real),
];

const DEFENSE_OPP: &[FieldDef] = &[
    f("Tkl", "opp_tackles", ColType::Real),
    f("TklW", "opp_tackles_won", ColType::Real),
    f("Int", "opp_interceptions", ColType::Real),
    f("Blocks", "opp_blocks", ColType::Real),
    f("Sh", "opp_shots_blocked", ColType::Real),
    f("Pass", "opp_passes_blocked", ColType::Real),
    f("Clr", "opp_clearances", ColType::Real),
    f("Err", "opp_errors", ColType::Real),
];

// ── Possession ────────────────────────────────────────────────────────────────

const POSSESSION_TEAM: &[FieldDef] = &[
    f("Poss", "possession_pct", ColType::Real),
    f("Touches", "touches", ColType::Real),
    f("Def Pen", "touches_def_pen", ColType::Real),
    f("Att Pen", "touches_att_pen", ColType::Real),
    f("Carries", "carries", ColType::Real),
    f("PrgC", "progressive_carries", ColType::Real),
    f("Mis", "miscontrols", ColType::Real),
    f("Dis", "dispossessed", ColType::Real),
];

const POSSESSION_OPP: &[FieldDef] = &[
    f("Poss", "opp_possession_pct", ColType::Real),
    f("Touches", "opp_touches", ColType::Real),
    f("Def Pen", "opp_touches_def_pen", ColType::Real),
    f("Att Pen", "opp_touches_att_pen", ColType::Real),
    f("Carries", "opp_carries", ColType::Real),
    f("PrgC", "opp_progressive_carries", ColType::Real),
    f("Mis", "opp_miscontrols", ColType::Real),
    f("Dis", "opp_dispossessed", ColType::Real),
];

// ── Goalkeeping ───────────────────────────────────────────────────────────────

const KEEPER_TEAM: &[FieldDef] = &[
    f("SoTA", "shots_on_target_against", ColType::Real),
    f("Saves", "saves", ColType::Real),
    f("Save%", "save_pct", ColType::Real),
    f("CS", "clean_sheets", ColType::Real),
    f("PSxG", "psxg", ColType::Real),
];

const KEEPER_OPP: &[FieldDef] = &[
    f("SoTA", "opp_shots_on_target_against", ColType::Real),
    f("Saves", "opp_saves", ColType::Real),
    f("Save%", "opp_save_pct", ColType::Real),
    f("CS", "opp_clean_sheets", ColType::Real),
    f("PSxG", "opp_psxg", ColType::Real),
];

// ── Miscellaneous ─────────────────────────────────────────────────────────────

const MISC_TEAM: &[FieldDef] = &[
    f("CrdY", "yellow_cards", ColType::Real),
    f("CrdR", "red_cards", ColType::Real),
    f("Fls", "fouls_committed", ColType::Real),
    f("Fld", "fouls_drawn", ColType::Real),
    f("Off", "offsides", ColType::Real),
    f("Crs", "crosses", ColType::Real),
    f("Recov", "recoveries", ColType::Real),
    f("Won", "aerials_won", ColType::Real),
    f("Lost", "aerials_lost", ColType::Real),
];

const MISC_OPP: &[FieldDef] = &[
    f("CrdY", "opp_yellow_cards", ColType::Real),
    f("CrdR", "opp_red_cards", ColType::Real),
    f("Fls", "opp_fouls_committed", ColType::Real),
    f("Fld", "opp_fouls_drawn", ColType::Real),
    f("Off", "opp_offsides", ColType::Real),
    f("Crs", "opp_crosses", ColType::Real),
    f("Recov", "opp_recoveries", ColType::Real),
    f("Won", "opp_aerials_won", ColType::Real),
    f("Lost", "opp_aerials_lost", ColType::Real),
];

// ── Registry ──────────────────────────────────────────────────────────────────

const CONFLICT_KEY: &[&str] = &["team_id", "match_date", "opponent"];

pub const MAPPINGS: &[StatMapping] = &[
    StatMapping {
        stat_type: "shooting",
        target_table: "team_shooting_stats",
        conflict_key: CONFLICT_KEY,
        common: COMMON,
        team: SHOOTING_TEAM,
        opponent: SHOOTING_OPP,
    },
    StatMapping {
        stat_type: "passing",
        target_table: "team_passing_stats",
        conflict_key: CONFLICT_KEY,
        common: COMMON,
        team: PASSING_TEAM,
        opponent: PASSING_OPP,
    },
    StatMapping {
        stat_type: "defense",
        target_table: "team_defense_stats",
        conflict_key: CONFLICT_KEY,
        common: COMMON,
        team: DEFENSE_TEAM,
        opponent: DEFENSE_OPP,
    },
    StatMapping {
        stat_type: "possession",
        target_table: "team_possession_stats",
        conflict_key: CONFLICT_KEY,
        common: COMMON,
        team: POSSESSION_TEAM,
        opponent: POSSESSION_OPP,
    },
    StatMapping {
        stat_type: "keeper",
        target_table: "team_keeper_stats",
        conflict_key: CONFLICT_KEY,
        common: COMMON,
        team: KEEPER_TEAM,
        opponent: KEEPER_OPP,
    },
    StatMapping {
        stat_type: "misc",
        target_table: "team_misc_stats",
        conflict_key: CONFLICT_KEY,
        common: COMMON,
        team: MISC_TEAM,
        opponent: MISC_OPP,
    },
];

pub fn mapping_for(stat_type: &str) -> Option<&'static StatMapping> {
    MAPPINGS.iter().find(|m| m.stat_type == stat_type)
}

/// Identity columns present on every record regardless of stat type.
pub const IDENTITY_COLUMNS: &[(&str, ColType)] = &[
    ("record_id", ColType::Text),
    ("team_id", ColType::Text),
    ("season", ColType::Text),
    ("scraped_at", ColType::Text),
];

impl StatMapping {
    /// Full target column list in DDL order.
    pub fn columns(&self) -> Vec<(&'static str, ColType)> {
        let mut cols: Vec<(&'static str, ColType)> =
            IDENTITY_COLUMNS.iter().map(|&(c, t)| (c, t)).collect();
        for def in self.common.iter().chain(self.team).chain(self.opponent) {
            cols.push((def.target, def.ty));
        }
        cols
    }
}

// ── Transform ─────────────────────────────────────────────────────────────────

fn apply(rec: &mut NormalizedRecord, defs: &[FieldDef], headers: &[String], cells: &[RawCell]) {
    for (header, cell) in headers.iter().zip(cells.iter()) {
        if let Some(def) = defs.iter().find(|d| d.raw == header) {
            rec.set(def.target, coerce_value(&cell.text));
        }
    }
}

/// Convert an extracted table pair into store-ready records.
///
/// Team and opponent rows pair positionally. A missing or short opponent
/// table records nulls for the opponent partition rather than failing the
/// unit. Rows without a date or opponent cannot form a conflict key and are
/// dropped with a warning.
pub fn transform_tables(
    pair: &TablePair,
    stat_type: &str,
    team_id: &str,
    season: &str,
    scraped_at: &str,
) -> Result<Vec<NormalizedRecord>, PipelineError> {
    let mapping =
        mapping_for(stat_type).ok_or_else(|| PipelineError::MappingMismatch(stat_type.to_string()))?;

    let mut records = Vec::with_capacity(pair.team.rows.len());

    for (i, row) in pair.team.rows.iter().enumerate() {
        let mut rec = NormalizedRecord::default();
        apply(&mut rec, mapping.common, &pair.team.headers, row);
        apply(&mut rec, mapping.team, &pair.team.headers, row);

        match pair.opponent.as_ref().and_then(|t| t.rows.get(i).map(|r| (&t.headers, r))) {
            Some((opp_headers, opp_row)) => {
                apply(&mut rec, mapping.opponent, opp_headers, opp_row);
            }
            None => {
                // Opponent table absent or shorter: empty stat object
                for def in mapping.opponent {
                    rec.set(def.target, NormalizedValue::Null);
                }
            }
        }

        let date = rec.get("match_date").and_then(NormalizedValue::as_str);
        let opponent = rec.get("opponent").and_then(NormalizedValue::as_str);
        let (Some(date), Some(opponent)) = (date, opponent) else {
            warn!(
                "{}/{}: row {} has no date/opponent, dropping",
                team_id, stat_type, i
            );
            continue;
        };

        let rid = record_id(team_id, date, opponent);
        rec.set("record_id", NormalizedValue::Text(rid));
        rec.set("team_id", NormalizedValue::Text(team_id.to_string()));
        rec.set("season", NormalizedValue::Text(season.to_string()));
        rec.set("scraped_at", NormalizedValue::Text(scraped_at.to_string()));

        records.push(rec);
    }

    Ok(records)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawCell, RawTable};

    fn shooting_pair(with_opponent: bool) -> TablePair {
        let headers: Vec<String> = ["Date", "Opponent", "Result", "Gls", "Sh", "SoT%", "Bogus"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let team = RawTable {
            headers: headers.clone(),
            rows: vec![
                vec![
                    RawCell::text("2024-03-01"),
                    RawCell::text("Chelsea"),
                    RawCell::text("W"),
                    RawCell::text("2"),
                    RawCell::text("14"),
                    RawCell::text("42.5%"),
                    RawCell::text("ignore-me"),
                ],
                vec![
                    RawCell::text("2024-03-08"),
                    RawCell::text("Everton"),
                    RawCell::text("D"),
                    RawCell::text("1"),
                    RawCell::text("9"),
                    RawCell::text(""),
                    RawCell::text("x"),
                ],
            ],
        };
        let opponent = with_opponent.then(|| RawTable {
            headers,
            rows: vec![vec![
                RawCell::text("2024-03-01"),
                RawCell::text("Chelsea"),
                RawCell::text("L"),
                RawCell::text("1"),
                RawCell::text("7"),
                RawCell::text("28%"),
                RawCell::text("y"),
            ]],
        });
        TablePair { team, opponent }
    }

    #[test]
    fn test_transform_maps_and_coerces() {
        let recs = transform_tables(&shooting_pair(true), "shooting", "arsenal", "2025-2026", "t0")
            .unwrap();
        assert_eq!(recs.len(), 2);

        let r = &recs[0];
        assert_eq!(r.get("goals"), Some(&NormalizedValue::Number(2.0)));
        assert_eq!(r.get("shots"), Some(&NormalizedValue::Number(14.0)));
        assert_eq!(
            r.get("shots_on_target_pct"),
            Some(&NormalizedValue::Fraction(0.425))
        );
        assert_eq!(
            r.get("match_date"),
            Some(&NormalizedValue::Date("2024-03-01".into()))
        );
        assert_eq!(r.get("result"), Some(&NormalizedValue::Text("W".into())));
    }

    #[test]
    fn test_unmapped_columns_dropped() {
        let recs = transform_tables(&shooting_pair(false), "shooting", "arsenal", "2025-2026", "t0")
            .unwrap();
        assert_eq!(recs[0].get("Bogus"), None);
        assert_eq!(recs[0].get("bogus"), None);
    }

    #[test]
    fn test_identity_fields_present() {
        let recs = transform_tables(&shooting_pair(false), "shooting", "arsenal", "2025-2026", "t0")
            .unwrap();
        assert_eq!(
            recs[0].get("record_id"),
            Some(&NormalizedValue::Text("arsenal_2024-03-01_chelsea".into()))
        );
        assert_eq!(
            recs[0].get("team_id"),
            Some(&NormalizedValue::Text("arsenal".into()))
        );
        assert_eq!(
            recs[0].get("season"),
            Some(&NormalizedValue::Text("2025-2026".into()))
        );
    }

    #[test]
    fn test_opponent_rows_pair_positionally() {
        let recs = transform_tables(&shooting_pair(true), "shooting", "arsenal", "2025-2026", "t0")
            .unwrap();
        // Row 0 has an opponent twin
        assert_eq!(recs[0].get("opp_goals"), Some(&NormalizedValue::Number(1.0)));
        assert_eq!(
            recs[0].get("opp_shots_on_target_pct"),
            Some(&NormalizedValue::Fraction(0.28))
        );
        // Row 1 does not: opponent stats empty, unit still succeeds
        assert_eq!(recs[1].get("opp_goals"), Some(&NormalizedValue::Null));
    }

    #[test]
    fn test_empty_cell_is_null() {
        let recs = transform_tables(&shooting_pair(false), "shooting", "arsenal", "2025-2026", "t0")
            .unwrap();
        assert_eq!(
            recs[1].get("shots_on_target_pct"),
            Some(&NormalizedValue::Null)
        );
    }

    #[test]
    fn test_unknown_stat_type_is_mapping_mismatch() {
        let err = transform_tables(&shooting_pair(false), "lineups", "arsenal", "2025-2026", "t0")
            .unwrap_err();
        assert!(matches!(err, PipelineError::MappingMismatch(_)));
    }

    #[test]
    fn test_rows_without_conflict_key_dropped() {
        let pair = TablePair {
            team: RawTable {
                headers: vec!["Date".into(), "Gls".into()],
                rows: vec![vec![RawCell::text("2024-03-01"), RawCell::text("3")]],
            },
            opponent: None,
        };
        let recs =
            transform_tables(&pair, "shooting", "arsenal", "2025-2026", "t0").unwrap();
        // No Opponent column, so no conflict key can be formed
        assert!(recs.is_empty());
    }

    #[test]
    fn test_every_mapping_has_unique_targets() {
        for m in MAPPINGS {
            let cols = m.columns();
            let unique: std::collections::HashSet<_> = cols.iter().map(|(c, _)| *c).collect();
            assert_eq!(unique.len(), cols.len(), "duplicate column in {}", m.stat_type);
            for key in m.conflict_key {
                assert!(
                    cols.iter().any(|(c, _)| c == key),
                    "conflict key {} missing from {}",
                    key,
                    m.stat_type
                );
            }
        }
    }
}
