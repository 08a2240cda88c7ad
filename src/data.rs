use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

/// Raw cell value as decoded from an upload or an in-memory row set.
///
/// This is a closed sum: downstream coercion matches exhaustively on it, so a
/// new source format has to widen this type rather than smuggle values through
/// as untyped strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn as_display(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    (*n as i64).to_string()
                } else {
                    n.to_string()
                }
            }
            CellValue::Text(s) => s.clone(),
        }
    }

    pub fn from_raw_str(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            CellValue::Null
        } else {
            CellValue::Text(trimmed.to_string())
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Returns true when the cell counts as missing for completeness and
/// inference purposes: null, empty/whitespace text, or a na/null token.
pub fn is_missing(value: &CellValue) -> bool {
    match value {
        CellValue::Null => true,
        CellValue::Text(s) => {
            let trimmed = s.trim();
            trimmed.is_empty()
                || trimmed.eq_ignore_ascii_case("na")
                || trimmed.eq_ignore_ascii_case("null")
        }
        _ => false,
    }
}

/// Extracts a finite numeric reading from a cell, stripping thousands
/// separators (commas and spaces) from text values. Booleans do not count.
pub fn numeric_value(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) if n.is_finite() => Some(*n),
        CellValue::Text(s) => parse_numeric_token(s),
        _ => None,
    }
}

pub fn parse_numeric_token(raw: &str) -> Option<f64> {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | ' '))
        .collect();
    if stripped.is_empty() {
        return None;
    }
    stripped.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Semantic type assigned to a column after inference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Date,
    Categorical,
    Text,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Date => "date",
            ColumnKind::Categorical => "categorical",
            ColumnKind::Text => "text",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnKind {
    type Err = anyhow::Error;

    fn from_str(token: &str) -> Result<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "numeric" => Ok(ColumnKind::Numeric),
            "date" => Ok(ColumnKind::Date),
            "categorical" => Ok(ColumnKind::Categorical),
            "text" => Ok(ColumnKind::Text),
            other => Err(anyhow!("Unknown column kind '{other}'")),
        }
    }
}

/// An in-memory tabular dataset: one shared ordered column set and rows of
/// cells aligned to it. Rows are rectangular by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<CellValue>>,
    ) -> Result<Self> {
        let width = columns.len();
        ensure!(width > 0, "Dataset requires at least one column");
        for (idx, row) in rows.iter().enumerate() {
            ensure!(
                row.len() == width,
                "Row {} has {} cell(s) but the dataset has {} column(s)",
                idx + 1,
                row.len(),
                width
            );
        }
        Ok(Self {
            name: name.into(),
            columns,
            rows,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cells of one column, in row order.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &CellValue> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_covers_null_empty_and_na_tokens() {
        assert!(is_missing(&CellValue::Null));
        assert!(is_missing(&CellValue::Text("  ".to_string())));
        assert!(is_missing(&CellValue::Text("NA".to_string())));
        assert!(is_missing(&CellValue::Text("null".to_string())));
        assert!(!is_missing(&CellValue::Text("0".to_string())));
        assert!(!is_missing(&CellValue::Number(0.0)));
    }

    #[test]
    fn numeric_value_strips_thousands_separators() {
        assert_eq!(
            numeric_value(&CellValue::Text("1,234.5".to_string())),
            Some(1234.5)
        );
        assert_eq!(
            numeric_value(&CellValue::Text("12 000".to_string())),
            Some(12000.0)
        );
        assert_eq!(numeric_value(&CellValue::Text("abc".to_string())), None);
        assert_eq!(numeric_value(&CellValue::Number(f64::NAN)), None);
        assert_eq!(numeric_value(&CellValue::Bool(true)), None);
    }

    #[test]
    fn column_kind_round_trips_through_str() {
        for kind in [
            ColumnKind::Numeric,
            ColumnKind::Date,
            ColumnKind::Categorical,
            ColumnKind::Text,
        ] {
            assert_eq!(kind.as_str().parse::<ColumnKind>().unwrap(), kind);
        }
        assert!("decimal".parse::<ColumnKind>().is_err());
    }

    #[test]
    fn dataset_rejects_ragged_rows() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let rows = vec![vec![CellValue::Null]];
        assert!(Dataset::new("t", columns, rows).is_err());
    }

    #[test]
    fn number_display_drops_trailing_fraction() {
        assert_eq!(CellValue::Number(100.0).as_display(), "100");
        assert_eq!(CellValue::Number(0.25).as_display(), "0.25");
    }
}
