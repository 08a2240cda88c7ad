use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Ingest, clean, score, and alert on tabular data", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Infer column types for a CSV or XLSX file
    Probe(ProbeArgs),
    /// Normalize a dataset and write the cleaned CSV plus a quality report
    Clean(CleanArgs),
    /// Run the full pipeline and print the quality report
    Score(ScoreArgs),
    /// Evaluate business rules against a dataset and report violations
    Evaluate(EvaluateArgs),
    /// Download a remote CSV export (e.g. a Google Sheets export URL)
    Fetch(FetchArgs),
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input file to inspect (.csv or .xlsx)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Workbook sheet to probe (defaults to the first sheet)
    #[arg(long)]
    pub sheet: Option<String>,
    /// Write the inferred types to a YAML overrides file
    #[arg(short = 't', long = "types")]
    pub types: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Input file to clean (.csv or .xlsx)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Cleaned CSV destination (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Manual column-type overrides (YAML, as written by probe --types)
    #[arg(long)]
    pub types: Option<PathBuf>,
    /// Write the JSON clean envelope (cleaned CSV, report, markdown) here
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// Write the markdown quality report here
    #[arg(long)]
    pub markdown: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ScoreArgs {
    /// Input file to score (.csv or .xlsx)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Manual column-type overrides (YAML)
    #[arg(long)]
    pub types: Option<PathBuf>,
    /// Emit the structured report as JSON instead of markdown
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    /// Input file holding the dataset to evaluate
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Rule definitions file (.yml or .json)
    #[arg(short = 'r', long = "rules")]
    pub rules: PathBuf,
    /// Write the evaluation response JSON here (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Baseline factor for the development stand-in provider
    #[arg(long, default_value_t = 0.95)]
    pub baseline_factor: f64,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// URL of the CSV export to download
    #[arg(short = 'u', long = "url")]
    pub url: String,
    /// Destination file for the downloaded CSV
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Request timeout in seconds
    #[arg(long, default_value_t = 15)]
    pub timeout_secs: u64,
}
