//! Async boundary operations: remote sheet fetch, AI summarization with a
//! local fallback, and batched violation insertion.
//!
//! Everything here is cancellable and timeout-bounded. The pipeline itself
//! stays synchronous; only these edges touch the network.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::warn;
use serde::Deserialize;

use crate::report;
use crate::rules::Violation;
use crate::score::QualityReport;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_INSERT_ATTEMPTS: usize = 3;

/// Downloads a remote CSV export (e.g. a Google Sheets export URL). A fetch
/// failure is surfaced to the caller; raw-data requests never degrade to a
/// fallback.
pub async fn fetch_remote_csv(url: &str, timeout: Duration) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Building HTTP client")?;
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Fetching remote sheet from {url}"))?;
    if !response.status().is_success() {
        bail!("Remote sheet fetch returned {}", response.status());
    }
    response
        .text()
        .await
        .with_context(|| format!("Reading remote sheet body from {url}"))
}

/// External AI summarization service. Treated as an opaque collaborator;
/// the pipeline only hands it the structured report and violations.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        report: &QualityReport,
        violations: &[Violation],
    ) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

/// Posts the report to an HTTP summarization endpoint and expects
/// `{"summary": "..."}` back.
pub struct HttpSummarizer {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSummarizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .context("Building summarizer HTTP client")?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(
        &self,
        report: &QualityReport,
        violations: &[Violation],
    ) -> Result<String> {
        let body = serde_json::json!({
            "report": report,
            "violations": violations,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Calling summarizer at {}", self.endpoint))?;
        if !response.status().is_success() {
            bail!("Summarizer returned {}", response.status());
        }
        let parsed: SummaryResponse = response
            .json()
            .await
            .context("Decoding summarizer response")?;
        Ok(parsed.summary)
    }
}

/// Asks the summarizer for a narrative and degrades to the locally computed
/// summary when the call fails or returns nothing. The fallback is a pure
/// function of the report, never a retried network call.
pub async fn summarize_or_fallback(
    summarizer: &dyn Summarizer,
    report: &QualityReport,
    violations: &[Violation],
) -> String {
    match summarizer.summarize(report, violations).await {
        Ok(summary) if !summary.trim().is_empty() => summary,
        Ok(_) => {
            warn!("Summarizer returned an empty narrative; using local summary");
            report::fallback_summary(report, violations)
        }
        Err(err) => {
            warn!("Summarizer unavailable ({err:#}); using local summary");
            report::fallback_summary(report, violations)
        }
    }
}

/// Destination for violation batches (the alert store). Insertion is
/// at-least-once: a retried batch may duplicate rows, and the store is
/// expected to tolerate that.
#[async_trait]
pub trait ViolationSink: Send + Sync {
    async fn insert_batch(&self, violations: &[Violation]) -> Result<usize>;
}

/// Retries a whole batch until one attempt succeeds. Partial inserts from
/// failed attempts are not rolled back (at-least-once semantics).
pub async fn insert_with_retry(
    sink: &dyn ViolationSink,
    violations: &[Violation],
    attempts: usize,
) -> Result<usize> {
    if violations.is_empty() {
        return Ok(0);
    }
    let mut last_error = None;
    for attempt in 1..=attempts.max(1) {
        match sink.insert_batch(violations).await {
            Ok(inserted) => return Ok(inserted),
            Err(err) => {
                warn!("Violation insert attempt {attempt} failed: {err:#}");
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow!("Violation insert never attempted")))
}

/// In-memory sink for tests and local runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    inserted: Mutex<Vec<Violation>>,
}

impl MemorySink {
    pub fn inserted(&self) -> Vec<Violation> {
        self.inserted.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl ViolationSink for MemorySink {
    async fn insert_batch(&self, violations: &[Violation]) -> Result<usize> {
        let mut guard = self.inserted.lock().expect("sink lock");
        guard.extend_from_slice(violations);
        Ok(violations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CellValue, ColumnKind, Dataset};
    use crate::normalize::normalize;
    use crate::rules::Severity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn tiny_report() -> QualityReport {
        let dataset = Dataset::new(
            "t",
            vec!["v".to_string()],
            vec![vec![CellValue::Text("1".to_string())]],
        )
        .unwrap();
        let kinds = vec![ColumnKind::Numeric];
        let normalized = normalize(&dataset, &kinds).unwrap();
        crate::score::score(&normalized, &kinds).unwrap()
    }

    fn tiny_violation() -> Violation {
        Violation {
            rule_id: Uuid::new_v4(),
            metric_value: 1.0,
            threshold_value: 0.5,
            baseline_value: None,
            percentage_change: None,
            severity: Severity::Low,
            message: "v sum 1.000 > threshold 0.5 (severity low)".to_string(),
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _: &QualityReport, _: &[Violation]) -> Result<String> {
            bail!("service unavailable")
        }
    }

    #[tokio::test]
    async fn summarize_falls_back_locally_on_error() {
        let report = tiny_report();
        let summary = summarize_or_fallback(&FailingSummarizer, &report, &[]).await;
        assert_eq!(summary, report::fallback_summary(&report, &[]));
    }

    struct FlakySink {
        failures_remaining: AtomicUsize,
        inner: MemorySink,
    }

    #[async_trait]
    impl ViolationSink for FlakySink {
        async fn insert_batch(&self, violations: &[Violation]) -> Result<usize> {
            if self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                bail!("transient write failure");
            }
            self.inner.insert_batch(violations).await
        }
    }

    #[tokio::test]
    async fn insert_retries_until_success() {
        let sink = FlakySink {
            failures_remaining: AtomicUsize::new(2),
            inner: MemorySink::default(),
        };
        let violations = vec![tiny_violation()];
        let inserted = insert_with_retry(&sink, &violations, 3).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(sink.inner.inserted().len(), 1);
    }

    #[tokio::test]
    async fn insert_gives_up_after_attempts() {
        let sink = FlakySink {
            failures_remaining: AtomicUsize::new(10),
            inner: MemorySink::default(),
        };
        let violations = vec![tiny_violation()];
        assert!(insert_with_retry(&sink, &violations, 2).await.is_err());
    }

    #[tokio::test]
    async fn empty_batches_are_not_sent() {
        let sink = MemorySink::default();
        assert_eq!(insert_with_retry(&sink, &[], 3).await.unwrap(), 0);
        assert!(sink.inserted().is_empty());
    }
}
