//! Value normalization: coerces raw cells into their column's inferred kind
//! and drops exact-duplicate rows.
//!
//! Coercion is best-effort by policy: a cell that fails to coerce becomes
//! null and processing continues. One bad cell never aborts a dataset.

use anyhow::{Result, ensure};
use chrono::{Days, NaiveDate, NaiveDateTime};
use log::debug;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::data::{CellValue, ColumnKind, Dataset, is_missing, numeric_value};
use crate::infer::{SERIAL_UPPER_DEFAULT, is_excel_serial};

/// Result of a normalization pass. The dataset inside holds only coerced
/// values and no two rows are deep-equal.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub dataset: Dataset,
    pub original_rows: usize,
    pub duplicates_removed: usize,
}

/// Converts an Excel day serial to a calendar date. Serial 1 is 1900-01-01.
///
/// Excel's epoch treats 1900 as a leap year, so serials at or past the
/// phantom 1900-02-29 are already offset by one day relative to the real
/// calendar; serials before it need the extra day added back.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !is_excel_serial(serial, crate::infer::SERIAL_UPPER_EXCEL) {
        return None;
    }
    let days = serial as u64;
    let adjusted = if days >= 60 { days } else { days + 1 };
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(adjusted))
}

fn two_digit_year_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{2})$").expect("static date pattern")
    })
}

/// Explicit-format date parsing in priority order: ISO, then slash-form with
/// 4-digit year, then 2-digit-year expansion (years under 100 get +2000),
/// then a generic sweep over the remaining shapes.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    for fmt in ["%m/%d/%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }
    if let Some(caps) = two_digit_year_pattern().captures(trimmed) {
        let month: u32 = caps[1].parse().ok()?;
        let day: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year + 2000, month, day);
    }
    const GENERIC_FORMATS: &[&str] = &[
        "%d-%m-%Y",
        "%m-%d-%Y",
        "%b %d, %Y",
        "%B %d, %Y",
        "%b %d %Y",
        "%B %d %Y",
        "%d %b %Y",
        "%d %B %Y",
    ];
    for fmt in GENERIC_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }
    const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.date());
        }
    }
    None
}

/// Coerces one cell against its column kind. Failures become null.
pub fn coerce_cell(value: &CellValue, kind: ColumnKind, serial_upper: f64) -> CellValue {
    if is_missing(value) {
        return CellValue::Null;
    }
    match kind {
        ColumnKind::Numeric => match numeric_value(value) {
            Some(n) => CellValue::Number(n),
            None => CellValue::Null,
        },
        ColumnKind::Date => {
            if let Some(n) = numeric_value(value)
                && is_excel_serial(n, serial_upper)
                && let Some(date) = excel_serial_to_date(n)
            {
                return CellValue::Text(date.format("%Y-%m-%d").to_string());
            }
            match value {
                CellValue::Text(s) => match parse_flexible_date(s) {
                    Some(date) => CellValue::Text(date.format("%Y-%m-%d").to_string()),
                    None => CellValue::Null,
                },
                _ => CellValue::Null,
            }
        }
        ColumnKind::Categorical | ColumnKind::Text => {
            CellValue::Text(value.as_display().trim().to_string())
        }
    }
}

fn row_fingerprint(row: &[CellValue]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for cell in row {
        match cell {
            CellValue::Null => hasher.update(b"\x00"),
            CellValue::Bool(b) => {
                hasher.update(b"\x01");
                hasher.update([*b as u8]);
            }
            CellValue::Number(n) => {
                hasher.update(b"\x02");
                hasher.update(n.to_bits().to_le_bytes());
            }
            CellValue::Text(s) => {
                hasher.update(b"\x03");
                hasher.update(s.as_bytes());
            }
        }
        hasher.update(b"\x1f");
    }
    hasher.finalize().into()
}

/// Normalizes a dataset against its inferred column kinds and removes exact
/// duplicates, preserving first-seen row order. Idempotent: re-running on
/// its own output is the identity.
pub fn normalize(dataset: &Dataset, kinds: &[ColumnKind]) -> Result<Normalized> {
    normalize_with(dataset, kinds, SERIAL_UPPER_DEFAULT)
}

pub fn normalize_with(
    dataset: &Dataset,
    kinds: &[ColumnKind],
    serial_upper: f64,
) -> Result<Normalized> {
    ensure!(
        kinds.len() == dataset.columns.len(),
        "Normalizer received {} kind(s) for {} column(s)",
        kinds.len(),
        dataset.columns.len()
    );
    let original_rows = dataset.row_count();
    let mut seen: HashSet<[u8; 32]> = HashSet::with_capacity(original_rows);
    let mut rows = Vec::with_capacity(original_rows);
    for row in &dataset.rows {
        let coerced: Vec<CellValue> = row
            .iter()
            .zip(kinds)
            .map(|(cell, kind)| coerce_cell(cell, *kind, serial_upper))
            .collect();
        if seen.insert(row_fingerprint(&coerced)) {
            rows.push(coerced);
        }
    }
    let duplicates_removed = original_rows - rows.len();
    if duplicates_removed > 0 {
        debug!(
            "Removed {duplicates_removed} duplicate row(s) from '{}'",
            dataset.name
        );
    }
    let dataset = Dataset::new(dataset.name.clone(), dataset.columns.clone(), rows)?;
    Ok(Normalized {
        dataset,
        original_rows,
        duplicates_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn excel_serial_one_is_new_years_1900() {
        assert_eq!(
            excel_serial_to_date(1.0),
            NaiveDate::from_ymd_opt(1900, 1, 1)
        );
        assert_eq!(excel_serial_to_date(0.0), None);
        assert_eq!(excel_serial_to_date(-3.0), None);
    }

    #[test]
    fn excel_serial_skips_the_phantom_leap_day() {
        assert_eq!(
            excel_serial_to_date(59.0),
            NaiveDate::from_ymd_opt(1900, 2, 28)
        );
        assert_eq!(
            excel_serial_to_date(61.0),
            NaiveDate::from_ymd_opt(1900, 3, 1)
        );
        // A modern serial checked against Excel itself.
        assert_eq!(
            excel_serial_to_date(45000.0),
            NaiveDate::from_ymd_opt(2023, 3, 15)
        );
    }

    #[test]
    fn two_digit_years_expand_to_2000s() {
        assert_eq!(
            parse_flexible_date("1/5/99"),
            NaiveDate::from_ymd_opt(2099, 1, 5)
        );
        assert_eq!(
            parse_flexible_date("12/31/07"),
            NaiveDate::from_ymd_opt(2007, 12, 31)
        );
    }

    #[test]
    fn datetime_input_truncates_to_date() {
        assert_eq!(
            parse_flexible_date("2023-06-01T08:15:00"),
            NaiveDate::from_ymd_opt(2023, 6, 1)
        );
    }

    #[test]
    fn numeric_coercion_strips_separators_and_nulls_failures() {
        assert_eq!(
            coerce_cell(&text("1,234.5"), ColumnKind::Numeric, SERIAL_UPPER_DEFAULT),
            CellValue::Number(1234.5)
        );
        assert_eq!(
            coerce_cell(&text("oops"), ColumnKind::Numeric, SERIAL_UPPER_DEFAULT),
            CellValue::Null
        );
        assert_eq!(
            coerce_cell(&text("NA"), ColumnKind::Numeric, SERIAL_UPPER_DEFAULT),
            CellValue::Null
        );
    }

    #[test]
    fn date_coercion_prefers_serial_then_patterns() {
        assert_eq!(
            coerce_cell(
                &CellValue::Number(45000.0),
                ColumnKind::Date,
                crate::infer::SERIAL_UPPER_EXCEL
            ),
            text("2023-03-15")
        );
        assert_eq!(
            coerce_cell(&text("2023-01-15"), ColumnKind::Date, SERIAL_UPPER_DEFAULT),
            text("2023-01-15")
        );
        assert_eq!(
            coerce_cell(&text("not a date"), ColumnKind::Date, SERIAL_UPPER_DEFAULT),
            CellValue::Null
        );
    }

    #[test]
    fn dedup_preserves_first_seen_order() {
        let dataset = Dataset::new(
            "t",
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec![text("x"), text("1")],
                vec![text("y"), text("2")],
                vec![text("x "), text("1")],
            ],
        )
        .unwrap();
        let kinds = vec![ColumnKind::Text, ColumnKind::Numeric];
        let normalized = normalize(&dataset, &kinds).unwrap();
        assert_eq!(normalized.duplicates_removed, 1);
        assert_eq!(normalized.dataset.rows.len(), 2);
        assert_eq!(normalized.dataset.rows[0][0], text("x"));
        assert_eq!(normalized.dataset.rows[1][0], text("y"));
    }

    #[test]
    fn normalize_is_idempotent() {
        let dataset = Dataset::new(
            "t",
            vec!["n".to_string(), "d".to_string()],
            vec![
                vec![text("1,000"), text("1/5/99")],
                vec![text("bad"), text("2023-01-01")],
                vec![text("1000"), text("2099-01-05")],
            ],
        )
        .unwrap();
        let kinds = vec![ColumnKind::Numeric, ColumnKind::Date];
        let first = normalize(&dataset, &kinds).unwrap();
        let second = normalize(&first.dataset, &kinds).unwrap();
        assert_eq!(second.duplicates_removed, 0);
        assert_eq!(first.dataset, second.dataset);
    }
}
