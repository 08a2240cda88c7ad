//! Quality and health scoring over normalized datasets: per-column
//! completeness, z-score outlier counts, least-squares trend classification,
//! and the composite 0-100 score consumed by the dashboard.

use anyhow::{Result, ensure};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::{CellValue, ColumnKind, Dataset, is_missing};
use crate::normalize::Normalized;

const OUTLIER_Z: f64 = 3.0;
const OUTLIER_MIN_VALUES: usize = 10;
const RISKY_OUTLIER_SHARE: f64 = 0.05;
const TREND_MIN_ROWS: usize = 10;
const TREND_FLAT_BAND: f64 = 0.1;

const MISSING_WEIGHT: f64 = 0.6;
const DUPLICATE_WEIGHT: f64 = 0.3;
const OUTLIER_WEIGHT: f64 = 0.1;
const OUTLIER_PENALTY_SCALE: f64 = 5.0;

/// Direction of the dataset's numeric columns over row order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    Volatile,
    InsufficientData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnQuality {
    pub column: String,
    pub dominant_type: ColumnKind,
    pub missing_pct: f64,
    pub outlier_count: usize,
    pub numeric_count: usize,
    pub date_count: usize,
    pub text_count: usize,
    /// Set when outliers exceed 5% of the column's numeric values.
    pub risky: bool,
}

/// Structured quality report. Derived fresh on every scoring run and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub dataset: String,
    pub original_row_count: usize,
    pub cleaned_row_count: usize,
    pub duplicates_removed: usize,
    /// Composite 0-100 score.
    pub overall_score: f64,
    /// Mean per-column completeness in [0, 1].
    pub data_quality: f64,
    pub trend: Trend,
    pub per_column: Vec<ColumnQuality>,
    pub risks: Vec<String>,
    pub opportunities: Vec<String>,
    pub critical_issues: Vec<String>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn sample_std_dev(values: &[f64], mu: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    variance.max(0.0).sqrt()
}

pub(crate) fn z_exceeds(value: f64, mu: f64, sigma: f64) -> bool {
    sigma > 0.0 && ((value - mu) / sigma).abs() > OUTLIER_Z
}

/// Counts values more than three sample standard deviations from the mean.
/// Returns zero unless there are more than ten values.
pub fn count_outliers(values: &[f64]) -> usize {
    if values.len() <= OUTLIER_MIN_VALUES {
        return 0;
    }
    let mu = mean(values);
    let sigma = sample_std_dev(values, mu);
    values
        .iter()
        .filter(|v| z_exceeds(**v, mu, sigma))
        .count()
}

/// Least-squares slope of `values` against their indices; zero when the
/// denominator degenerates.
pub fn regression_slope(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let x_bar = mean(&points.iter().map(|(x, _)| *x).collect::<Vec<_>>());
    let y_bar = mean(&points.iter().map(|(_, y)| *y).collect::<Vec<_>>());
    let numerator: f64 = points
        .iter()
        .map(|(x, y)| (x - x_bar) * (y - y_bar))
        .sum();
    let denominator: f64 = points.iter().map(|(x, _)| (x - x_bar).powi(2)).sum();
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn classify_trend(slopes: &[f64], row_count: usize) -> Trend {
    if row_count < TREND_MIN_ROWS || slopes.is_empty() {
        return Trend::InsufficientData;
    }
    let avg = mean(slopes);
    let variance = mean(
        &slopes
            .iter()
            .map(|s| (s - avg).powi(2))
            .collect::<Vec<_>>(),
    );
    if variance > 2.0 * avg.abs() {
        Trend::Volatile
    } else if avg > TREND_FLAT_BAND {
        Trend::Improving
    } else if avg < -TREND_FLAT_BAND {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

fn is_iso_date(text: &str) -> bool {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

/// Scores a normalized dataset. Pure over its inputs; holds no state.
pub fn score(normalized: &Normalized, kinds: &[ColumnKind]) -> Result<QualityReport> {
    let dataset = &normalized.dataset;
    ensure!(
        kinds.len() == dataset.columns.len(),
        "Scorer received {} kind(s) for {} column(s)",
        kinds.len(),
        dataset.columns.len()
    );
    let row_count = dataset.row_count();

    let mut per_column = Vec::with_capacity(dataset.columns.len());
    let mut completeness = Vec::with_capacity(dataset.columns.len());
    let mut slopes = Vec::new();
    let mut total_outliers = 0usize;

    for (idx, name) in dataset.columns.iter().enumerate() {
        let mut non_missing = 0usize;
        let mut numeric_count = 0usize;
        let mut date_count = 0usize;
        let mut text_count = 0usize;
        let mut numeric_points: Vec<(f64, f64)> = Vec::new();

        for (row_idx, cell) in dataset.column_values(idx).enumerate() {
            if is_missing(cell) {
                continue;
            }
            non_missing += 1;
            match cell {
                CellValue::Number(n) => {
                    numeric_count += 1;
                    numeric_points.push((row_idx as f64, *n));
                }
                CellValue::Text(s) if is_iso_date(s) => date_count += 1,
                _ => text_count += 1,
            }
        }

        let column_completeness = if row_count == 0 {
            1.0
        } else {
            non_missing as f64 / row_count as f64
        };
        completeness.push(column_completeness);

        let values: Vec<f64> = numeric_points.iter().map(|(_, v)| *v).collect();
        let outlier_count = if kinds[idx] == ColumnKind::Numeric {
            count_outliers(&values)
        } else {
            0
        };
        total_outliers += outlier_count;
        let risky = !values.is_empty()
            && outlier_count as f64 > RISKY_OUTLIER_SHARE * values.len() as f64;

        if kinds[idx] == ColumnKind::Numeric && !numeric_points.is_empty() {
            slopes.push(regression_slope(&numeric_points));
        }

        per_column.push(ColumnQuality {
            column: name.clone(),
            dominant_type: kinds[idx],
            missing_pct: (1.0 - column_completeness) * 100.0,
            outlier_count,
            numeric_count,
            date_count,
            text_count,
            risky,
        });
    }

    let data_quality = mean(&completeness);
    let trend = classify_trend(&slopes, row_count);

    let avg_missing_pct = mean(
        &per_column
            .iter()
            .map(|c| c.missing_pct)
            .collect::<Vec<_>>(),
    );
    let dup_penalty = if normalized.original_rows == 0 {
        0.0
    } else {
        normalized.duplicates_removed as f64 / normalized.original_rows as f64 * 100.0
    };
    let outlier_penalty = if row_count == 0 {
        0.0
    } else {
        total_outliers as f64 / row_count as f64 * OUTLIER_PENALTY_SCALE
    };
    let overall_score = (100.0
        - MISSING_WEIGHT * avg_missing_pct
        - DUPLICATE_WEIGHT * dup_penalty
        - OUTLIER_WEIGHT * outlier_penalty)
        .max(0.0);

    let (risks, opportunities, critical_issues) =
        advisory_notes(&per_column, trend, dup_penalty);

    Ok(QualityReport {
        dataset: dataset.name.clone(),
        original_row_count: normalized.original_rows,
        cleaned_row_count: row_count,
        duplicates_removed: normalized.duplicates_removed,
        overall_score,
        data_quality,
        trend,
        per_column,
        risks,
        opportunities,
        critical_issues,
    })
}

/// Human-readable annotations derived from the computed figures. Advisory
/// only; nothing downstream computes over these strings.
fn advisory_notes(
    per_column: &[ColumnQuality],
    trend: Trend,
    dup_penalty: f64,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut risks = Vec::new();
    let mut opportunities = Vec::new();
    let mut critical_issues = Vec::new();

    for column in per_column {
        if column.missing_pct > 50.0 {
            critical_issues.push(format!(
                "column {} has {:.0}% missing data",
                column.column, column.missing_pct
            ));
        } else if column.missing_pct > 20.0 {
            risks.push(format!(
                "column {} has {:.0}% missing data",
                column.column, column.missing_pct
            ));
        }
        if column.risky {
            risks.push(format!(
                "column {} has {} outlier value(s)",
                column.column, column.outlier_count
            ));
        }
    }
    if dup_penalty > 10.0 {
        risks.push(format!(
            "{:.0}% of uploaded rows were duplicates",
            dup_penalty
        ));
    }
    match trend {
        Trend::Declining => critical_issues.push("declining trends detected".to_string()),
        Trend::Improving => opportunities.push("improving trends detected".to_string()),
        Trend::Volatile => risks.push("volatile metric behavior detected".to_string()),
        _ => {}
    }

    (risks, opportunities, critical_issues)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outlier_test_is_strictly_greater_than_three_sigma() {
        assert!(!z_exceeds(3.0, 0.0, 1.0));
        assert!(z_exceeds(3.01, 0.0, 1.0));
        assert!(z_exceeds(-3.01, 0.0, 1.0));
    }

    #[test]
    fn outliers_need_more_than_ten_values() {
        // Ten zeros and one spike: z of the spike is 10/sqrt(11), about 3.015.
        let mut values = vec![0.0; 10];
        values.push(100.0);
        assert_eq!(count_outliers(&values), 1);
        // Same shape at ten values total detects nothing.
        let mut values = vec![0.0; 9];
        values.push(100.0);
        assert_eq!(count_outliers(&values), 0);
    }

    #[test]
    fn slope_is_zero_for_degenerate_x() {
        assert_eq!(regression_slope(&[(1.0, 5.0), (1.0, 9.0)]), 0.0);
        assert_eq!(regression_slope(&[(0.0, 1.0)]), 0.0);
    }

    #[test]
    fn slope_matches_hand_computation() {
        let points: Vec<(f64, f64)> =
            (0..5).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        assert!((regression_slope(&points) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn trend_classification_bands() {
        assert_eq!(classify_trend(&[0.5, 0.4], 20), Trend::Improving);
        assert_eq!(classify_trend(&[-0.5, -0.4], 20), Trend::Declining);
        assert_eq!(classify_trend(&[0.05, 0.05], 20), Trend::Stable);
        // Spread far beyond twice the mean magnitude.
        assert_eq!(classify_trend(&[5.0, -5.0], 20), Trend::Volatile);
        assert_eq!(classify_trend(&[1.0], 5), Trend::InsufficientData);
        assert_eq!(classify_trend(&[], 50), Trend::InsufficientData);
    }
}
