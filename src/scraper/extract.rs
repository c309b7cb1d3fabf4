//! Table extraction with layered fallback matching.
//!
//! The stats upstream wraps many of its tables in HTML comments to defeat
//! naive scrapers, so every document is first run through
//! [`reveal_hidden_tables`], which removes the comment delimiters while
//! leaving the content intact. The same matching chain then applies to
//! visible and formerly-hidden tables alike.

use crate::error::PipelineError;
use crate::models::{RawCell, RawTable, TablePair, Team};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

/// Strip comment delimiters so commented-out tables become parseable.
/// Heuristic, not a guarantee: content between the delimiters is untouched.
pub fn reveal_hidden_tables(html: &str) -> String {
    html.replace("<!--", "").replace("-->", "")
}

fn sel(css: &str) -> Selector {
    // Every selector in this module is a literal; parse cannot fail for them.
    Selector::parse(css).expect("literal CSS selector")
}

// ── Table candidates ──────────────────────────────────────────────────────────

struct TableCandidate<'a> {
    element: ElementRef<'a>,
    id: Option<String>,
    caption: String,
}

fn collect_tables(doc: &Html) -> Vec<TableCandidate<'_>> {
    let table_sel = sel("table");
    let caption_sel = sel("caption");

    doc.select(&table_sel)
        .map(|element| {
            let id = element.value().attr("id").map(|s| s.to_string());
            let caption = element
                .select(&caption_sel)
                .next()
                .map(|c| c.text().collect::<String>().to_lowercase())
                .unwrap_or_default();
            TableCandidate { element, id, caption }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TableRole {
    Team,
    Opponent,
}

/// Ordered fallback chain, first match wins.
///
/// Tiers 3 and 4 cannot tell the two roles apart, so they only ever select
/// the team table; a generically matched "opponent" would risk pairing rows
/// against an unrelated table.
fn find_table<'a>(
    candidates: &[TableCandidate<'a>],
    stat_type: &str,
    role: TableRole,
) -> Option<ElementRef<'a>> {
    let exact = match role {
        TableRole::Team => format!("matchlogs_for_{stat_type}"),
        TableRole::Opponent => format!("matchlogs_against_{stat_type}"),
    };

    // 1. Exact id match
    if let Some(c) = candidates.iter().find(|c| c.id.as_deref() == Some(exact.as_str())) {
        return Some(c.element);
    }

    // 2. Partial id match: stat key or the generic matchlogs marker. The
    //    "against" substring decides which role a partial id belongs to.
    let partial = candidates.iter().find(|c| {
        let Some(id) = c.id.as_deref() else { return false };
        let relevant = id.contains(stat_type) || id.contains("matchlogs");
        let against = id.contains("against");
        relevant
            && match role {
                TableRole::Team => !against,
                TableRole::Opponent => against,
            }
    });
    if let Some(c) = partial {
        return Some(c.element);
    }

    if role == TableRole::Opponent {
        return None;
    }

    // 3. Caption keyword match
    let keywords = ["team stats", "match stats", "summary", stat_type];
    if let Some(c) = candidates
        .iter()
        .find(|c| keywords.iter().any(|k| c.caption.contains(k)))
    {
        return Some(c.element);
    }

    // 4. Generic fallback: first table in document order with real data
    candidates
        .iter()
        .find(|c| parse_table(c.element).rows.len() >= 2)
        .map(|c| c.element)
}

// ── Single-table parsing ──────────────────────────────────────────────────────

fn row_texts(tr: ElementRef) -> Vec<String> {
    let cell_sel = sel("th, td");
    tr.select(&cell_sel)
        .map(|c| c.text().collect::<String>().trim().to_string())
        .collect()
}

fn row_cells(tr: ElementRef) -> Vec<RawCell> {
    let cell_sel = sel("th, td");
    let a_sel = sel("a");
    tr.select(&cell_sel)
        .map(|c| RawCell {
            text: c.text().collect::<String>().trim().to_string(),
            link: c
                .select(&a_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|h| h.to_string()),
        })
        .collect()
}

fn has_content(cells: &[String]) -> bool {
    cells.iter().any(|c| !c.is_empty())
}

/// Extract headers and data rows from one table element.
///
/// Header fallback order: last `<thead>` row, any `<thead>` row, first body
/// row. Repeated in-body header rows (class `thead`) and rows with zero
/// non-empty cells are skipped.
pub fn parse_table(table: ElementRef) -> RawTable {
    let thead_tr = sel("thead tr");
    let tbody_tr = sel("tbody tr");
    let tr_sel = sel("tr");

    let head_rows: Vec<Vec<String>> = table.select(&thead_tr).map(row_texts).collect();

    // Stat tables use a two-level thead; the last row carries the real
    // column names, the rows above are grouping banners.
    let mut headers: Vec<String> = head_rows
        .last()
        .filter(|r| has_content(r))
        .cloned()
        .unwrap_or_default();
    if headers.is_empty() {
        headers = head_rows
            .iter()
            .find(|r| has_content(r))
            .cloned()
            .unwrap_or_default();
    }

    let mut body: Vec<ElementRef> = table.select(&tbody_tr).collect();
    if body.is_empty() {
        // No tbody: take every tr not nested in a thead
        body = table
            .select(&tr_sel)
            .filter(|tr| {
                tr.parent()
                    .and_then(ElementRef::wrap)
                    .map(|p| p.value().name() != "thead")
                    .unwrap_or(true)
            })
            .collect();
    }

    let mut header_from_body = false;
    if headers.is_empty() {
        if let Some(first) = body.first() {
            headers = row_texts(*first);
            header_from_body = true;
        }
    }

    let mut rows = Vec::new();
    for (i, tr) in body.iter().enumerate() {
        if header_from_body && i == 0 {
            continue;
        }
        // Upstream repeats the header mid-table every ~25 rows
        if tr.value().classes().any(|c| c == "thead") {
            continue;
        }
        let cells = row_cells(*tr);
        if cells.iter().all(|c| c.text.is_empty()) {
            continue;
        }
        rows.push(cells);
    }

    RawTable { headers, rows }
}

// ── Document-level extraction ─────────────────────────────────────────────────

/// Locate and parse the team table (and its opponent twin, when present)
/// for one stat type.
pub fn extract_tables(html: &str, stat_type: &str) -> Result<TablePair, PipelineError> {
    let revealed = reveal_hidden_tables(html);
    let doc = Html::parse_document(&revealed);
    let candidates = collect_tables(&doc);

    if candidates.is_empty() {
        warn!("No tables at all in document (stat type '{}')", stat_type);
        return Err(PipelineError::NoTableFound(stat_type.to_string()));
    }

    let Some(team_el) = find_table(&candidates, stat_type, TableRole::Team) else {
        warn!(
            "{} table candidates, none matched stat type '{}'",
            candidates.len(),
            stat_type
        );
        return Err(PipelineError::NoTableFound(stat_type.to_string()));
    };

    let team = parse_table(team_el);
    let opponent = find_table(&candidates, stat_type, TableRole::Opponent).map(parse_table);

    debug!(
        "Extracted {} team rows, opponent table: {}",
        team.rows.len(),
        opponent.as_ref().map(|t| t.rows.len().to_string()).unwrap_or("absent".into())
    );

    Ok(TablePair { team, opponent })
}

// ── Standings page ────────────────────────────────────────────────────────────

/// Pull team links out of the league standings page. Squad links look like
/// `/en/squads/<hash>/<Team-Name>-Stats`; the slug comes from the last path
/// segment so it stays stable across runs.
pub fn parse_team_links(html: &str) -> Vec<Team> {
    let revealed = reveal_hidden_tables(html);
    let doc = Html::parse_document(&revealed);
    let a_sel = sel("table a");

    let mut teams = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for a in doc.select(&a_sel) {
        let Some(href) = a.value().attr("href") else { continue };
        if !href.contains("/squads/") {
            continue;
        }
        let name = a.text().collect::<String>().trim().to_string();
        if name.is_empty() {
            continue;
        }
        let id = super::cleaner::slug(&name);
        if id.is_empty() || !seen.insert(id.clone()) {
            continue;
        }
        teams.push(Team {
            id,
            name,
            squad_path: href.to_string(),
        });
    }

    teams
}

// ── Tests ─────────────────────────────────────────────────────────────────────
