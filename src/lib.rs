pub mod cli;
pub mod data;
pub mod infer;
pub mod ingest;
pub mod normalize;
pub mod remote;
pub mod report;
pub mod rules;
pub mod score;
pub mod table;

use std::{env, fs, path::Path, sync::OnceLock, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::cli::{Cli, Commands};
use crate::data::{ColumnKind, Dataset};
use crate::infer::{SERIAL_UPPER_DEFAULT, SERIAL_UPPER_EXCEL, TypeOverrides};
use crate::normalize::Normalized;
use crate::rules::FixedFactorBaseline;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("datapulse", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => handle_probe(&args),
        Commands::Clean(args) => handle_clean(&args),
        Commands::Score(args) => handle_score(&args),
        Commands::Evaluate(args) => handle_evaluate(&args),
        Commands::Fetch(args) => handle_fetch(&args),
    }
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"))
}

fn serial_upper_for(path: &Path) -> f64 {
    if is_workbook(path) {
        SERIAL_UPPER_EXCEL
    } else {
        SERIAL_UPPER_DEFAULT
    }
}

fn load_dataset(path: &Path, sheet: Option<&str>) -> Result<Dataset> {
    match sheet {
        Some(wanted) if is_workbook(path) => {
            let sheets = ingest::from_workbook(path)?;
            sheets
                .into_iter()
                .find(|(name, _)| name == wanted)
                .map(|(_, dataset)| dataset)
                .ok_or_else(|| anyhow::anyhow!("Sheet '{wanted}' not found in {:?}", path))
        }
        _ => ingest::load_path(path),
    }
}

fn inferred_kinds(
    dataset: &Dataset,
    serial_upper: f64,
    overrides: Option<&Path>,
) -> Result<Vec<ColumnKind>> {
    let mut kinds = infer::infer_dataset_with(dataset, serial_upper);
    if let Some(path) = overrides {
        let overrides = TypeOverrides::load(path)?;
        overrides.apply(&dataset.columns, &mut kinds);
    }
    Ok(kinds)
}

fn handle_probe(args: &cli::ProbeArgs) -> Result<()> {
    info!("Probing '{}'", args.input.display());
    let dataset = load_dataset(&args.input, args.sheet.as_deref())?;
    let kinds = infer::infer_dataset_with(&dataset, serial_upper_for(&args.input));

    let headers = vec![
        "column".to_string(),
        "kind".to_string(),
        "non_missing".to_string(),
    ];
    let rows: Vec<Vec<String>> = dataset
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let non_missing = dataset
                .column_values(idx)
                .filter(|v| !data::is_missing(v))
                .count();
            vec![name.clone(), kinds[idx].to_string(), non_missing.to_string()]
        })
        .collect();
    table::print_table(&headers, &rows);

    if let Some(path) = &args.types {
        let overrides = TypeOverrides {
            columns: dataset
                .columns
                .iter()
                .cloned()
                .zip(kinds.iter().copied())
                .collect(),
        };
        overrides.save(path)?;
        info!("Inferred types for {} column(s) written to {:?}", kinds.len(), path);
    }
    Ok(())
}

fn run_pipeline(
    input: &Path,
    overrides: Option<&Path>,
) -> Result<(Normalized, Vec<ColumnKind>, score::QualityReport)> {
    let dataset = load_dataset(input, None)?;
    let serial_upper = serial_upper_for(input);
    let kinds = inferred_kinds(&dataset, serial_upper, overrides)?;
    let normalized = normalize::normalize_with(&dataset, &kinds, serial_upper)?;
    let quality = score::score(&normalized, &kinds)?;
    Ok((normalized, kinds, quality))
}

fn handle_clean(args: &cli::CleanArgs) -> Result<()> {
    let (normalized, _kinds, quality) = run_pipeline(&args.input, args.types.as_deref())?;
    let cleaned_csv = report::to_cleaned_csv(&normalized.dataset)?;
    let markdown = report::to_markdown(&quality);

    match &args.output {
        Some(path) => {
            fs::write(path, &cleaned_csv)
                .with_context(|| format!("Writing cleaned CSV to {:?}", path))?;
            info!(
                "Cleaned {} row(s) ({} duplicate(s) removed) into {:?}",
                normalized.dataset.row_count(),
                normalized.duplicates_removed,
                path
            );
        }
        None => print!("{cleaned_csv}"),
    }
    if let Some(path) = &args.markdown {
        fs::write(path, &markdown)
            .with_context(|| format!("Writing markdown report to {:?}", path))?;
    }
    if let Some(path) = &args.report {
        let envelope = report::CleanOutput {
            cleaned_csv,
            report: quality,
            markdown,
        };
        let rendered = serde_json::to_string_pretty(&envelope)?;
        fs::write(path, rendered)
            .with_context(|| format!("Writing clean envelope to {:?}", path))?;
    }
    Ok(())
}

fn handle_score(args: &cli::ScoreArgs) -> Result<()> {
    let (_normalized, _kinds, quality) = run_pipeline(&args.input, args.types.as_deref())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&quality)?);
    } else {
        print!("{}", report::to_markdown(&quality));
    }
    Ok(())
}

fn handle_evaluate(args: &cli::EvaluateArgs) -> Result<()> {
    let (normalized, _kinds, _quality) = run_pipeline(&args.input, None)?;
    let mut rule_set = rules::load_rules(&args.rules)?;
    let provider = FixedFactorBaseline {
        factor: args.baseline_factor,
    };
    let summary = rules::evaluate_all(&mut rule_set, &normalized.dataset, &provider);
    info!(
        "Evaluated {} rule(s), {} violation(s)",
        summary.rules_evaluated,
        summary.violations.len()
    );

    let response = serde_json::json!({
        "rules_evaluated": summary.rules_evaluated,
        "violations_created": summary.violations.len(),
        "violations": summary.violations,
    });
    let rendered = serde_json::to_string_pretty(&response)?;
    match &args.output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("Writing evaluation response to {:?}", path))?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn handle_fetch(args: &cli::FetchArgs) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Starting async runtime")?;
    let timeout = Duration::from_secs(args.timeout_secs);
    let body = runtime.block_on(remote::fetch_remote_csv(&args.url, timeout))?;
    fs::write(&args.output, &body)
        .with_context(|| format!("Writing fetched CSV to {:?}", args.output))?;
    info!("Fetched {} byte(s) into {:?}", body.len(), args.output);
    Ok(())
}
