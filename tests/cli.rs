use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::tempdir;

const UPLOAD: &str = "name,revenue,date\nA,100,2023-01-01\nB,200,2023-02-01\nA,100,2023-01-01\n";

fn write_upload(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("upload.csv");
    std::fs::write(&path, UPLOAD).expect("write upload fixture");
    path
}

fn datapulse() -> Command {
    Command::cargo_bin("datapulse").expect("binary under test")
}

#[test]
fn probe_prints_inferred_kinds() {
    let dir = tempdir().unwrap();
    let input = write_upload(dir.path());
    datapulse()
        .args(["probe", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            contains("column")
                .and(contains("revenue"))
                .and(contains("numeric"))
                .and(contains("date")),
        );
}

#[test]
fn probe_writes_types_file() {
    let dir = tempdir().unwrap();
    let input = write_upload(dir.path());
    let types = dir.path().join("types.yml");
    datapulse()
        .args([
            "probe",
            "-i",
            input.to_str().unwrap(),
            "--types",
            types.to_str().unwrap(),
        ])
        .assert()
        .success();
    let rendered = std::fs::read_to_string(&types).unwrap();
    assert!(rendered.contains("revenue: numeric"));
    assert!(rendered.contains("date: date"));
}

#[test]
fn clean_removes_duplicates_and_writes_report() {
    let dir = tempdir().unwrap();
    let input = write_upload(dir.path());
    let output = dir.path().join("cleaned.csv");
    let report = dir.path().join("envelope.json");
    datapulse()
        .args([
            "clean",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ])
        .assert()
        .success();

    let cleaned = std::fs::read_to_string(&output).unwrap();
    assert_eq!(cleaned.lines().count(), 3);

    let envelope: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(envelope["report"]["duplicates_removed"], 1);
    assert_eq!(envelope["report"]["cleaned_row_count"], 2);
    assert!(
        envelope["markdown"]
            .as_str()
            .unwrap()
            .starts_with("# Data Quality Report")
    );
}

#[test]
fn score_emits_markdown_by_default_and_json_on_request() {
    let dir = tempdir().unwrap();
    let input = write_upload(dir.path());
    datapulse()
        .args(["score", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("# Data Quality Report").and(contains("| revenue |")));

    datapulse()
        .args(["score", "-i", input.to_str().unwrap(), "--json"])
        .assert()
        .success()
        .stdout(contains("\"overall_score\"").and(contains("\"per_column\"")));
}

#[test]
fn evaluate_reports_violations_from_rules_file() {
    let dir = tempdir().unwrap();
    let input = write_upload(dir.path());
    let rules = dir.path().join("rules.yml");
    std::fs::write(
        &rules,
        "- id: 643bb1fb-87eb-44b7-84d2-51a66468e4a8\n  metric_column: revenue\n  operator: greater_than\n  threshold_value: 250\n  comparison_type: absolute\n",
    )
    .unwrap();
    datapulse()
        .args([
            "evaluate",
            "-i",
            input.to_str().unwrap(),
            "-r",
            rules.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(
            contains("\"rules_evaluated\": 1")
                .and(contains("\"violations_created\": 1"))
                .and(contains("\"severity\": \"low\"")),
        );
}

#[test]
fn unsupported_extension_fails_with_typed_message() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("upload.parquet");
    std::fs::write(&input, "name\nA\n").unwrap();
    datapulse()
        .args(["clean", "-i", input.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("Unsupported file extension"));
}

#[test]
fn empty_upload_is_rejected() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("empty.csv");
    std::fs::write(&input, "").unwrap();
    datapulse()
        .args(["score", "-i", input.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("is empty"));
}
