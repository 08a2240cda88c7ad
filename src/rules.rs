//! Threshold-based business rules: metric computation, absolute and
//! percentage comparison, severity bucketing, and batch evaluation with
//! per-rule failure isolation.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::{Dataset, numeric_value};

/// Tolerance for equality comparisons on metric sums.
pub const EQUALITY_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    GreaterThan,
    LessThan,
    Equals,
    NotEquals,
    GreaterThanOrEqual,
    LessThanOrEqual,
    IncreasesByMoreThan,
    DecreasesByMoreThan,
    ChangesByMoreThan,
}

impl Operator {
    fn symbol(&self) -> &'static str {
        match self {
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LessThanOrEqual => "<=",
            Operator::IncreasesByMoreThan => "+%>",
            Operator::DecreasesByMoreThan => "-%>",
            Operator::ChangesByMoreThan => "±%>",
        }
    }

    fn is_percentage(&self) -> bool {
        matches!(
            self,
            Operator::IncreasesByMoreThan
                | Operator::DecreasesByMoreThan
                | Operator::ChangesByMoreThan
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonType {
    Absolute,
    Percentage,
    Trend,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BaselineCalculation {
    PreviousPeriod,
    MovingAverage,
    FixedValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(token)
    }
}

/// Buckets a deviation-to-threshold ratio into a severity.
pub fn severity_for_ratio(ratio: f64) -> Severity {
    if ratio >= 3.0 {
        Severity::Critical
    } else if ratio >= 2.0 {
        Severity::High
    } else if ratio >= 1.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// A user-defined threshold rule. Only `trigger_count` and `last_triggered`
/// are mutated by evaluation; deactivation is an external action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: Uuid,
    pub metric_column: String,
    pub operator: Operator,
    pub threshold_value: f64,
    pub comparison_type: ComparisonType,
    #[serde(default)]
    pub time_window: Option<String>,
    #[serde(default)]
    pub baseline_calculation: Option<BaselineCalculation>,
    #[serde(default)]
    pub baseline_value: Option<f64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub trigger_count: u64,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

/// Emitted at most once per rule per evaluation pass; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: Uuid,
    pub metric_value: f64,
    pub threshold_value: f64,
    pub baseline_value: Option<f64>,
    pub percentage_change: Option<f64>,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub rules_evaluated: usize,
    pub violations: Vec<Violation>,
}

/// Supplies the reference value a percentage rule compares against.
/// `previous_period` and `moving_average` are historical lookups that this
/// core treats as an injected dependency.
pub trait BaselineProvider {
    fn baseline(&self, rule: &BusinessRule, current: f64) -> Result<f64>;
}

/// Development stand-in baseline: historical strategies resolve to
/// `current x factor`. Not meaningful business logic; production callers
/// must inject a provider backed by a real time-series store.
#[derive(Debug, Clone, Copy)]
pub struct FixedFactorBaseline {
    pub factor: f64,
}

impl Default for FixedFactorBaseline {
    fn default() -> Self {
        Self { factor: 0.95 }
    }
}

impl BaselineProvider for FixedFactorBaseline {
    fn baseline(&self, rule: &BusinessRule, current: f64) -> Result<f64> {
        match rule.baseline_calculation {
            Some(BaselineCalculation::FixedValue) => rule.baseline_value.ok_or_else(|| {
                anyhow!(
                    "Rule {} uses a fixed-value baseline but supplies no baseline_value",
                    rule.id
                )
            }),
            _ => Ok(current * self.factor),
        }
    }
}

/// The metric is always the sum of the rule's column, with non-numeric
/// cells contributing zero. Sum is the only supported aggregation; this is
/// a documented scope limitation, not an extension point.
pub fn metric_value(rule: &BusinessRule, dataset: &Dataset) -> Result<f64> {
    let idx = dataset.column_index(&rule.metric_column).ok_or_else(|| {
        anyhow!(
            "Metric column '{}' not present in dataset '{}'",
            rule.metric_column,
            dataset.name
        )
    })?;
    Ok(dataset
        .column_values(idx)
        .filter_map(numeric_value)
        .sum())
}

fn absolute_violated(operator: Operator, current: f64, threshold: f64) -> Result<bool> {
    let violated = match operator {
        Operator::GreaterThan => current > threshold,
        Operator::LessThan => current < threshold,
        Operator::Equals => (current - threshold).abs() <= EQUALITY_TOLERANCE,
        Operator::NotEquals => (current - threshold).abs() > EQUALITY_TOLERANCE,
        Operator::GreaterThanOrEqual => current >= threshold,
        Operator::LessThanOrEqual => current <= threshold,
        other => bail!(
            "Operator '{}' is a percentage operator and cannot be used with absolute comparison",
            other.symbol()
        ),
    };
    Ok(violated)
}

fn percentage_violated(operator: Operator, change: f64, threshold: f64) -> Result<bool> {
    let violated = match operator {
        Operator::IncreasesByMoreThan => change > threshold,
        Operator::DecreasesByMoreThan => change < -threshold,
        Operator::ChangesByMoreThan => change.abs() > threshold,
        other => bail!(
            "Operator '{}' cannot be used with percentage comparison",
            other.symbol()
        ),
    };
    Ok(violated)
}

/// Evaluates one rule against a dataset. Returns the violation when the
/// rule's condition is met, updating the rule's trigger bookkeeping.
pub fn evaluate_rule(
    rule: &mut BusinessRule,
    dataset: &Dataset,
    provider: &dyn BaselineProvider,
) -> Result<Option<Violation>> {
    if !rule.is_active {
        debug!("Rule {} is inactive; skipping", rule.id);
        return Ok(None);
    }
    let current = metric_value(rule, dataset)?;

    let (violated, baseline, percentage_change, ratio) = match rule.comparison_type {
        ComparisonType::Absolute => {
            if rule.operator.is_percentage() {
                bail!(
                    "Rule {} pairs percentage operator '{}' with absolute comparison",
                    rule.id,
                    rule.operator.symbol()
                );
            }
            let violated = absolute_violated(rule.operator, current, rule.threshold_value)?;
            // Deviation proxy for the absolute path: distance from the
            // threshold relative to its magnitude.
            let ratio = if rule.threshold_value.abs() > f64::EPSILON {
                (current - rule.threshold_value).abs() / rule.threshold_value.abs()
            } else {
                0.0
            };
            (violated, None, None, ratio)
        }
        ComparisonType::Percentage => {
            let baseline = provider
                .baseline(rule, current)
                .with_context(|| format!("Computing baseline for rule {}", rule.id))?;
            if baseline.abs() <= f64::EPSILON {
                bail!("Rule {} has a zero baseline; percentage change undefined", rule.id);
            }
            let change = (current - baseline) / baseline * 100.0;
            let violated = percentage_violated(rule.operator, change, rule.threshold_value)?;
            let ratio = if rule.threshold_value.abs() > f64::EPSILON {
                change.abs() / rule.threshold_value.abs()
            } else {
                0.0
            };
            (violated, Some(baseline), Some(change), ratio)
        }
        ComparisonType::Trend => bail!(
            "Rule {} requests trend comparison, which requires a time-series history this core does not hold",
            rule.id
        ),
    };

    if !violated {
        return Ok(None);
    }

    let severity = severity_for_ratio(ratio);
    let message = match percentage_change {
        Some(change) => format!(
            "{} sum {:.3} changed {:+.1}% against baseline {:.3} (threshold {}%, severity {})",
            rule.metric_column,
            current,
            change,
            baseline.unwrap_or_default(),
            rule.threshold_value,
            severity
        ),
        None => format!(
            "{} sum {:.3} {} threshold {} (severity {})",
            rule.metric_column,
            current,
            rule.operator.symbol(),
            rule.threshold_value,
            severity
        ),
    };

    rule.trigger_count += 1;
    rule.last_triggered = Some(Utc::now());

    Ok(Some(Violation {
        rule_id: rule.id,
        metric_value: current,
        threshold_value: rule.threshold_value,
        baseline_value: baseline,
        percentage_change,
        severity,
        message,
    }))
}

/// Evaluates a batch of rules sequentially. A failing rule is logged and
/// skipped so one malformed rule cannot block the rest of the batch.
pub fn evaluate_all(
    rules: &mut [BusinessRule],
    dataset: &Dataset,
    provider: &dyn BaselineProvider,
) -> EvaluationSummary {
    let mut violations = Vec::new();
    let mut evaluated = 0usize;
    for rule in rules.iter_mut() {
        if !rule.is_active {
            continue;
        }
        evaluated += 1;
        match evaluate_rule(rule, dataset, provider) {
            Ok(Some(violation)) => violations.push(violation),
            Ok(None) => {}
            Err(err) => warn!("Rule {} failed to evaluate: {err:#}", rule.id),
        }
    }
    EvaluationSummary {
        rules_evaluated: evaluated,
        violations,
    }
}

/// Loads rule definitions from a JSON or YAML file, routed by extension.
pub fn load_rules(path: &Path) -> Result<Vec<BusinessRule>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Reading rules file {:?}", path))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&raw).with_context(|| format!("Parsing JSON rules in {:?}", path))
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("Parsing YAML rules in {:?}", path))
    }
}
