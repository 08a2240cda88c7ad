//! Report rendering: cleaned CSV text, the markdown quality report, the
//! JSON clean envelope, and the locally computed summary used when the
//! external AI summarizer is unavailable.

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::rules::Violation;
use crate::score::QualityReport;

/// JSON envelope returned by the cleaning surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanOutput {
    pub cleaned_csv: String,
    pub report: QualityReport,
    pub markdown: String,
}

/// Renders a dataset back to CSV. Fields containing delimiters, quotes, or
/// newlines are quoted with doubled quotes (the csv crate's RFC 4180
/// behavior); null cells render as empty fields.
pub fn to_cleaned_csv(dataset: &Dataset) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&dataset.columns)
        .context("Writing CSV header")?;
    for (idx, row) in dataset.rows.iter().enumerate() {
        let rendered: Vec<String> = row.iter().map(|cell| cell.as_display()).collect();
        writer
            .write_record(&rendered)
            .with_context(|| format!("Writing CSV row {}", idx + 1))?;
    }
    let bytes = writer.into_inner().context("Flushing CSV output")?;
    String::from_utf8(bytes).context("Cleaned CSV is not valid UTF-8")
}

/// Generates the markdown quality report consumed by the dashboard's
/// report panel and PDF exporter.
pub fn to_markdown(report: &QualityReport) -> String {
    let mut out = String::new();
    out.push_str("# Data Quality Report\n\n");
    out.push_str(&format!(
        "Overall score: {:.1} / 100\n\n",
        report.overall_score
    ));
    out.push_str(&format!(
        "Rows: {} cleaned from {} uploaded ({} duplicate(s) removed)\n\n",
        report.cleaned_row_count, report.original_row_count, report.duplicates_removed
    ));
    out.push_str("| Column | Missing % | Type | #Numeric | #Date | #String | Outliers |\n");
    out.push_str("| --- | --- | --- | --- | --- | --- | --- |\n");
    for column in &report.per_column {
        out.push_str(&format!(
            "| {} | {:.1} | {} | {} | {} | {} | {} |\n",
            column.column,
            column.missing_pct,
            column.dominant_type,
            column.numeric_count,
            column.date_count,
            column.text_count,
            column.outlier_count
        ));
    }
    for (heading, lines) in [
        ("Risks", &report.risks),
        ("Opportunities", &report.opportunities),
        ("Critical issues", &report.critical_issues),
    ] {
        if lines.is_empty() {
            continue;
        }
        out.push_str(&format!("\n## {heading}\n\n"));
        for line in lines {
            out.push_str(&format!("- {line}\n"));
        }
    }
    out
}

/// Deterministic textual summary computed from the report and violations.
/// This is the degraded path when the AI summarization call fails; it must
/// not perform any I/O.
pub fn fallback_summary(report: &QualityReport, violations: &[Violation]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Dataset '{}': {} row(s) after cleaning ({} duplicate(s) removed), quality score {:.1}/100, trend {:?}.",
        report.dataset,
        report.cleaned_row_count,
        report.duplicates_removed,
        report.overall_score,
        report.trend
    ));
    let incomplete = report
        .per_column
        .iter()
        .filter(|c| c.missing_pct > 20.0)
        .map(|c| c.column.as_str())
        .join(", ");
    if !incomplete.is_empty() {
        out.push_str(&format!(" Columns with notable gaps: {incomplete}."));
    }
    if violations.is_empty() {
        out.push_str(" No business rules were violated.");
    } else {
        out.push_str(&format!(
            " {} rule violation(s), highest severity {}.",
            violations.len(),
            violations
                .iter()
                .map(|v| v.severity)
                .max()
                .expect("non-empty violations")
        ));
    }
    out
}
