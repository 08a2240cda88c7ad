//! Raw ingestion adapter: decodes uploads (CSV, XLSX) or in-memory row sets
//! into loosely typed [`Dataset`]s with the column order of the source
//! preserved. Cells stay raw here; coercion belongs to the normalizer.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use calamine::{Data, Reader, Xlsx, open_workbook};
use log::debug;
use thiserror::Error;

use crate::data::{CellValue, Dataset};

/// Multipart upload cap shared with the edge-function surface.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Input rejections that terminate processing before any parsing starts.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unsupported file extension '{0}' (expected .csv or .xlsx)")]
    UnsupportedExtension(String),
    #[error("Input '{0}' is empty")]
    Empty(String),
    #[error("Input '{name}' is {size} bytes, exceeding the {cap} byte upload cap")]
    TooLarge { name: String, size: u64, cap: u64 },
    #[error("Workbook '{0}' contains no sheets")]
    NoSheets(String),
}

/// Parses CSV text into a dataset. The first row is the header; short rows
/// are padded with nulls and long rows truncated to the header width.
pub fn from_csv_str(name: &str, text: &str) -> Result<Dataset> {
    if text.trim().is_empty() {
        return Err(IngestError::Empty(name.to_string()).into());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .with_context(|| format!("Reading header row of '{name}'"))?;
    let columns = disambiguate_headers(headers.iter());
    let width = columns.len();

    let mut rows = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Reading row {} of '{name}'", row_idx + 2))?;
        let mut row: Vec<CellValue> = record
            .iter()
            .take(width)
            .map(CellValue::from_raw_str)
            .collect();
        row.resize(width, CellValue::Null);
        rows.push(row);
    }
    debug!("Parsed {} row(s) from '{name}'", rows.len());
    Dataset::new(name, columns, rows)
}

/// Loads a dataset from disk, routed by file extension. XLSX files yield
/// their first sheet; use [`from_workbook`] for multi-sheet access.
pub fn load_path(path: &Path) -> Result<Dataset> {
    check_upload_size(path)?;
    match extension_of(path).as_deref() {
        Some("csv") => from_csv_path(path),
        Some("xlsx") => {
            let mut sheets = from_workbook(path)?;
            let (sheet, dataset) = sheets.remove(0);
            debug!("Selected first sheet '{sheet}' of {:?}", path);
            Ok(dataset)
        }
        other => {
            Err(IngestError::UnsupportedExtension(other.unwrap_or_default().to_string()).into())
        }
    }
}

pub fn from_csv_path(path: &Path) -> Result<Dataset> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Reading CSV file {:?}", path))?;
    let name = dataset_name(path);
    from_csv_str(&name, &text)
}

/// Decodes every sheet of an XLSX workbook. Each sheet's first row is its
/// header; typed cells (numbers, booleans, date serials) are preserved as
/// typed [`CellValue`]s rather than re-rendered as strings.
pub fn from_workbook(path: &Path) -> Result<Vec<(String, Dataset)>> {
    let mut workbook: Xlsx<_> =
        open_workbook(path).with_context(|| format!("Opening workbook {:?}", path))?;
    let sheet_names = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(IngestError::NoSheets(dataset_name(path)).into());
    }

    let mut sheets = Vec::with_capacity(sheet_names.len());
    for sheet in sheet_names {
        let range = workbook
            .worksheet_range(&sheet)
            .with_context(|| format!("Reading sheet '{sheet}' of {:?}", path))?;
        let mut row_iter = range.rows();
        let Some(header_row) = row_iter.next() else {
            continue;
        };
        let columns = disambiguate_headers(header_row.iter().map(|cell| match cell {
            Data::String(s) => s.trim().to_string(),
            other => other.to_string(),
        }));
        let width = columns.len();
        let mut rows = Vec::new();
        for row in row_iter {
            let mut cells: Vec<CellValue> =
                row.iter().take(width).map(cell_from_workbook).collect();
            cells.resize(width, CellValue::Null);
            rows.push(cells);
        }
        let dataset = Dataset::new(format!("{}#{sheet}", dataset_name(path)), columns, rows)?;
        sheets.push((sheet, dataset));
    }
    if sheets.is_empty() {
        return Err(IngestError::NoSheets(dataset_name(path)).into());
    }
    Ok(sheets)
}

/// Wraps an in-memory row set (the dashboard's connected-source path) into a
/// dataset without copying values through a serialization round trip.
pub fn from_rows(
    name: &str,
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
) -> Result<Dataset> {
    if columns.is_empty() {
        return Err(IngestError::Empty(name.to_string()).into());
    }
    Dataset::new(name, columns, rows)
}

fn cell_from_workbook(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::String(s) => CellValue::from_raw_str(s),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::from_raw_str(s),
        Data::Error(_) => CellValue::Null,
    }
}

fn check_upload_size(path: &Path) -> Result<()> {
    let metadata =
        fs::metadata(path).with_context(|| format!("Inspecting upload {:?}", path))?;
    let size = metadata.len();
    if size == 0 {
        return Err(IngestError::Empty(dataset_name(path)).into());
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(IngestError::TooLarge {
            name: dataset_name(path),
            size,
            cap: MAX_UPLOAD_BYTES,
        }
        .into());
    }
    Ok(())
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Duplicate header names get `_2`, `_3`, ... suffixes so column lookup by
/// name stays unambiguous. Blank headers become `column_N`.
fn disambiguate_headers<I, S>(headers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for (idx, header) in headers.into_iter().enumerate() {
        let base = header.as_ref().trim();
        let base = if base.is_empty() {
            format!("column_{}", idx + 1)
        } else {
            base.to_string()
        };
        let mut candidate = base.clone();
        let mut suffix = 2usize;
        while seen.iter().any(|existing| existing == &candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        seen.push(candidate.clone());
        out.push(candidate);
    }
    out
}
