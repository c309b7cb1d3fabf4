use crate::models::NormalizedValue;
use chrono::NaiveDate;

// ── Value coercion ────────────────────────────────────────────────────────────

/// Coerce one raw cell into a typed value.
///
/// "42.5%" → Fraction(0.425) | "12" → Number(12.0) | "2024-03-01" → Date |
/// "" / whitespace → Null | anything else → trimmed Text
pub fn coerce_value(raw: &str) -> NormalizedValue {
    let s = raw.trim();
    if s.is_empty() {
        return NormalizedValue::Null;
    }

    if let Some(pct) = s.strip_suffix('%') {
        if let Ok(v) = pct.trim().replace(',', "").parse::<f64>() {
            return NormalizedValue::Fraction(v / 100.0);
        }
    }

    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        return NormalizedValue::Date(s.to_string());
    }

    if let Ok(v) = s.replace(',', "").parse::<f64>() {
        return NormalizedValue::Number(v);
    }

    NormalizedValue::Text(s.to_string())
}

// ── Identity helpers ──────────────────────────────────────────────────────────

/// Lowercase ASCII slug: non-alphanumerics collapse to single dashes.
/// "Manchester City" → "manchester-city"
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash = false;
    for c in s.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Deterministic conflict-resolution id for one match row.
pub fn record_id(team_id: &str, match_date: &str, opponent: &str) -> String {
    format!("{}_{}_{}", team_id, match_date, slug(opponent))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_becomes_fraction() {
        assert_eq!(coerce_value("42.5%"), NormalizedValue::Fraction(0.425));
        assert_eq!(coerce_value("100%"), NormalizedValue::Fraction(1.0));
        assert_eq!(coerce_value(" 7% "), NormalizedValue::Fraction(0.07));
    }

    #[test]
    fn test_numeric() {
        assert_eq!(coerce_value("12"), NormalizedValue::Number(12.0));
        assert_eq!(coerce_value("-0.3"), NormalizedValue::Number(-0.3));
        assert_eq!(coerce_value("1,234"), NormalizedValue::Number(1234.0));
    }

    #[test]
    fn test_iso_date_passes_through() {
        assert_eq!(
            coerce_value("2024-03-01"),
            NormalizedValue::Date("2024-03-01".to_string())
        );
    }

    #[test]
    fn test_empty_is_null() {
        assert_eq!(coerce_value(""), NormalizedValue::Null);
        assert_eq!(coerce_value("   "), NormalizedValue::Null);
    }

    #[test]
    fn test_text_is_trimmed() {
        assert_eq!(
            coerce_value("  Away "),
            NormalizedValue::Text("Away".to_string())
        );
        // A bare "%" is not a percentage
        assert_eq!(coerce_value("%"), NormalizedValue::Text("%".to_string()));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Manchester City"), "manchester-city");
        assert_eq!(slug("  Brighton & Hove Albion "), "brighton-hove-albion");
        assert_eq!(slug("Arsenal"), "arsenal");
        assert_eq!(slug("***"), "");
    }

    #[test]
    fn test_record_id_is_deterministic() {
        let a = record_id("arsenal", "2024-03-01", "Manchester City");
        let b = record_id("arsenal", "2024-03-01", "Manchester City");
        assert_eq!(a, b);
        assert_eq!(a, "arsenal_2024-03-01_manchester-city");
    }
}
