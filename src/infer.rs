//! Column type inference: classifies each column as numeric, date,
//! categorical, or text from its observed raw values.
//!
//! Detection order is load-bearing: the Excel-serial and pattern date gates
//! run before the numeric gate, because day-serial integers would otherwise
//! classify as plain numbers. The thresholds (80% serial, 60% pattern date,
//! 70% numeric, categorical cardinality 2..=50 below half the non-empty
//! count) are part of the contract and pinned by tests.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data::{CellValue, ColumnKind, Dataset, is_missing, numeric_value};

/// Upper bound for the Excel-serial gate on the CSV upload path.
pub const SERIAL_UPPER_DEFAULT: f64 = 100_000.0;
/// Excel's own last representable day serial (9999-12-31), used on the
/// workbook path where serials are produced by the decoder itself.
pub const SERIAL_UPPER_EXCEL: f64 = 2_958_465.0;

const SERIAL_RATIO: f64 = 0.8;
const PATTERN_DATE_RATIO: f64 = 0.6;
const NUMERIC_RATIO: f64 = 0.7;
const YEAR_COLUMN_RATIO: f64 = 0.8;
const CATEGORICAL_MIN: usize = 2;
const CATEGORICAL_MAX: usize = 50;
const CATEGORICAL_DISTINCT_RATIO: f64 = 0.5;

const YEAR_MIN: i32 = 1900;
const YEAR_MAX: i32 = 2100;

/// True when `value` is a valid Excel day serial: a whole number in
/// `[1, upper]`. Serial 0 and negatives are rejected.
pub fn is_excel_serial(value: f64, upper: f64) -> bool {
    value.is_finite() && value.fract() == 0.0 && value >= 1.0 && value <= upper
}

/// The serial gate inspects typed numeric cells only: workbook decoding and
/// in-memory sources produce real numbers for date serials, while CSV text
/// like "100" must stay eligible for the numeric classification below.
fn cell_is_excel_serial(value: &CellValue, upper: f64) -> bool {
    match value {
        CellValue::Number(n) => is_excel_serial(*n, upper),
        _ => false,
    }
}

enum DateShape {
    Date(&'static [&'static str]),
    DateTime(&'static [&'static str]),
    Time(&'static [&'static str]),
    Year,
}

struct DatePattern {
    regex: Regex,
    shape: DateShape,
}

fn date_patterns() -> &'static [DatePattern] {
    static PATTERNS: OnceLock<Vec<DatePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let make = |pattern: &str, shape: DateShape| DatePattern {
            regex: Regex::new(pattern).expect("static date pattern"),
            shape,
        };
        vec![
            make(
                r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(:\d{2})?",
                DateShape::DateTime(&[
                    "%Y-%m-%dT%H:%M:%S",
                    "%Y-%m-%d %H:%M:%S",
                    "%Y-%m-%dT%H:%M",
                    "%Y-%m-%d %H:%M",
                ]),
            ),
            make(r"^\d{4}-\d{2}-\d{2}$", DateShape::Date(&["%Y-%m-%d"])),
            make(
                r"^\d{1,2}/\d{1,2}/\d{4}$",
                DateShape::Date(&["%m/%d/%Y", "%d/%m/%Y"]),
            ),
            make(r"^\d{1,2}/\d{1,2}/\d{2}$", DateShape::Date(&["%m/%d/%y"])),
            make(
                r"^\d{1,2}-\d{1,2}-\d{4}$",
                DateShape::Date(&["%d-%m-%Y", "%m-%d-%Y"]),
            ),
            make(
                r"(?i)^[a-z]{3,9}\.? \d{1,2},? \d{4}$",
                DateShape::Date(&["%b %d, %Y", "%B %d, %Y", "%b %d %Y", "%B %d %Y"]),
            ),
            make(
                r"(?i)^\d{1,2} [a-z]{3,9} \d{4}$",
                DateShape::Date(&["%d %b %Y", "%d %B %Y"]),
            ),
            make(
                r"^\d{1,2}:\d{2}(:\d{2})?$",
                DateShape::Time(&["%H:%M:%S", "%H:%M"]),
            ),
            make(r"^(19|20)\d{2}$", DateShape::Year),
        ]
    })
}

fn is_four_digit_token(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.len() == 4 && trimmed.bytes().all(|b| b.is_ascii_digit())
}

fn year_in_range(year: i32) -> bool {
    (YEAR_MIN..=YEAR_MAX).contains(&year)
}

/// Pattern-based date test for one raw string. A match counts only when the
/// shape also parses to a real calendar date with a year in 1900..=2100.
///
/// `year_column` suppresses the bare 4-digit shape: when most of a column is
/// 4-digit tokens it is a year-number column, not a date column.
pub fn looks_like_date(raw: &str, year_column: bool) -> bool {
    use chrono::Datelike;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    for pattern in date_patterns() {
        if !pattern.regex.is_match(trimmed) {
            continue;
        }
        match &pattern.shape {
            DateShape::Date(formats) => {
                return formats.iter().any(|fmt| {
                    NaiveDate::parse_from_str(trimmed, fmt)
                        .is_ok_and(|d| year_in_range(d.year()))
                });
            }
            DateShape::DateTime(formats) => {
                return formats.iter().any(|fmt| {
                    NaiveDateTime::parse_from_str(trimmed, fmt)
                        .is_ok_and(|dt| year_in_range(dt.year()))
                });
            }
            DateShape::Time(formats) => {
                return formats
                    .iter()
                    .any(|fmt| NaiveTime::parse_from_str(trimmed, fmt).is_ok());
            }
            DateShape::Year => {
                if year_column {
                    return false;
                }
                return trimmed.parse::<i32>().is_ok_and(year_in_range);
            }
        }
    }
    false
}

fn cell_looks_like_date(value: &CellValue, year_column: bool) -> bool {
    match value {
        CellValue::Text(s) => looks_like_date(s, year_column),
        _ => false,
    }
}

/// Classifies one column from its raw values. Pure and deterministic.
pub fn infer_column(name: &str, values: &[CellValue]) -> ColumnKind {
    infer_column_with(name, values, SERIAL_UPPER_DEFAULT)
}

pub fn infer_column_with(name: &str, values: &[CellValue], serial_upper: f64) -> ColumnKind {
    let non_empty: Vec<&CellValue> = values.iter().filter(|v| !is_missing(v)).collect();
    if non_empty.is_empty() {
        return ColumnKind::Text;
    }
    let total = non_empty.len() as f64;

    let serial_hits = non_empty
        .iter()
        .filter(|v| cell_is_excel_serial(v, serial_upper))
        .count();
    if serial_hits as f64 / total > SERIAL_RATIO {
        debug!("Column '{name}': {serial_hits}/{} serial-date values", non_empty.len());
        return ColumnKind::Date;
    }

    let four_digit = non_empty
        .iter()
        .filter(|v| is_four_digit_token(&v.as_display()))
        .count();
    let year_column = four_digit as f64 / total >= YEAR_COLUMN_RATIO;

    let date_hits = non_empty
        .iter()
        .filter(|v| cell_looks_like_date(v, year_column))
        .count();
    if date_hits as f64 / total > PATTERN_DATE_RATIO {
        return ColumnKind::Date;
    }

    let numeric_hits = non_empty
        .iter()
        .filter(|v| numeric_value(v).is_some())
        .count();
    if numeric_hits as f64 / total > NUMERIC_RATIO {
        return ColumnKind::Numeric;
    }

    let distinct: HashSet<String> = non_empty
        .iter()
        .map(|v| v.as_display().trim().to_lowercase())
        .collect();
    if distinct.len() >= CATEGORICAL_MIN
        && distinct.len() <= CATEGORICAL_MAX
        && (distinct.len() as f64) < CATEGORICAL_DISTINCT_RATIO * total
    {
        return ColumnKind::Categorical;
    }

    ColumnKind::Text
}

/// Infers every column of a dataset, in column order.
pub fn infer_dataset(dataset: &Dataset) -> Vec<ColumnKind> {
    infer_dataset_with(dataset, SERIAL_UPPER_DEFAULT)
}

pub fn infer_dataset_with(dataset: &Dataset, serial_upper: f64) -> Vec<ColumnKind> {
    dataset
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<CellValue> = dataset.column_values(idx).cloned().collect();
            infer_column_with(name, &values, serial_upper)
        })
        .collect()
}

/// Manual type overrides supplied by the UI layer. Applied on top of the
/// inferred kinds without re-running inference; unknown column names are
/// ignored with a warning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeOverrides {
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnKind>,
}

impl TypeOverrides {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Reading type overrides from {:?}", path))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Parsing type overrides in {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered = serde_yaml::to_string(self)?;
        std::fs::write(path, rendered)
            .with_context(|| format!("Writing type overrides to {:?}", path))
    }

    pub fn apply(&self, columns: &[String], kinds: &mut [ColumnKind]) {
        for (name, kind) in &self.columns {
            match columns.iter().position(|c| c == name) {
                Some(idx) => kinds[idx] = *kind,
                None => warn!("Type override for unknown column '{name}' ignored"),
            }
        }
    }
}

/// A community-style override rule: columns whose names match the pattern
/// are pinned to a kind before the heuristics run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub id: String,
    pub column_pattern: String,
    pub kind: ColumnKind,
}

/// Repository of learned classification rules. Injected so the heuristic
/// core stays independent of however rules are stored and voted on.
pub trait ClassificationRuleStore {
    fn active_rules(&self) -> Result<Vec<ClassificationRule>>;
    fn record_outcome(&self, rule_id: &str, success: bool) -> Result<()>;
}

/// In-memory rule store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: Vec<ClassificationRule>,
    outcomes: Mutex<Vec<(String, bool)>>,
}

impl MemoryRuleStore {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self {
            rules,
            outcomes: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded_outcomes(&self) -> Vec<(String, bool)> {
        self.outcomes.lock().expect("outcome lock").clone()
    }
}

impl ClassificationRuleStore for MemoryRuleStore {
    fn active_rules(&self) -> Result<Vec<ClassificationRule>> {
        Ok(self.rules.clone())
    }

    fn record_outcome(&self, rule_id: &str, success: bool) -> Result<()> {
        self.outcomes
            .lock()
            .expect("outcome lock")
            .push((rule_id.to_string(), success));
        Ok(())
    }
}

/// Infers a dataset with learned rules applied first. A matching rule pins
/// the column's kind; the outcome recorded against the rule is whether the
/// heuristic classifier agreed with it.
pub fn infer_dataset_with_rules(
    dataset: &Dataset,
    store: &dyn ClassificationRuleStore,
) -> Result<Vec<ColumnKind>> {
    let rules = store.active_rules()?;
    let compiled: Vec<(ClassificationRule, Regex)> = rules
        .into_iter()
        .filter_map(|rule| {
            match Regex::new(&format!("(?i){}", rule.column_pattern)) {
                Ok(regex) => Some((rule, regex)),
                Err(err) => {
                    warn!(
                        "Skipping classification rule '{}' with bad pattern: {err}",
                        rule.id
                    );
                    None
                }
            }
        })
        .collect();

    let mut kinds = Vec::with_capacity(dataset.columns.len());
    for (idx, name) in dataset.columns.iter().enumerate() {
        let values: Vec<CellValue> = dataset.column_values(idx).cloned().collect();
        let heuristic = infer_column(name, &values);
        let pinned = compiled
            .iter()
            .find(|(_, regex)| regex.is_match(name))
            .map(|(rule, _)| rule);
        match pinned {
            Some(rule) => {
                store.record_outcome(&rule.id, rule.kind == heuristic)?;
                kinds.push(rule.kind);
            }
            None => kinds.push(heuristic),
        }
    }
    Ok(kinds)
}
