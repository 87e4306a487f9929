//! Alert data models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Error;

static EXPRESSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<metric>\S.*?)\s*(?P<op>>=|<=|==|>|<)\s*(?P<threshold>[-+]?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)\s*$")
        .expect("expression pattern is valid")
});

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal to
    Gte,
    /// Less than or equal to
    Lte,
    /// Equal to
    Eq,
}

impl Comparator {
    /// The operator as written in an expression
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eq => "==",
        }
    }

    /// Apply the comparison `value <op> threshold`
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Gte => value >= threshold,
            Self::Lte => value <= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Gt => "exceeded",
            Self::Lt => "fell below",
            Self::Gte => "reached or exceeded",
            Self::Lte => "fell to or below",
            Self::Eq => "equals",
        }
    }
}

impl FromStr for Comparator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Gte),
            "<=" => Ok(Self::Lte),
            "==" => Ok(Self::Eq),
            other => Err(Error::validation(format!("unknown comparator '{other}'"))),
        }
    }
}

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Low,
    /// Worth a look
    #[default]
    Medium,
    /// Needs attention soon
    High,
    /// Needs attention now
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Status of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Condition is currently true
    #[default]
    Firing,
    /// Condition is no longer true
    Resolved,
    /// Administratively suppressed for a bounded duration
    Silenced,
}

/// A typed comparison over a single metric, e.g. `cpu_usage > 80`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Metric identifier handed to the metric source
    pub metric: String,
    /// Comparison operator
    pub comparator: Comparator,
    /// Threshold value
    pub threshold: f64,
}

impl Predicate {
    /// Create a predicate
    pub fn new(metric: impl Into<String>, comparator: Comparator, threshold: f64) -> Self {
        Self {
            metric: metric.into(),
            comparator,
            threshold,
        }
    }

    /// Check if a value satisfies this predicate
    pub fn check(&self, value: f64) -> bool {
        self.comparator.compare(value, self.threshold)
    }
}

impl FromStr for Predicate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = EXPRESSION_RE.captures(s).ok_or_else(|| {
            Error::validation(format!(
                "expression '{s}' is not of the form '<metric> <op> <number>'"
            ))
        })?;

        let threshold = caps["threshold"]
            .parse::<f64>()
            .map_err(|e| Error::validation(format!("invalid threshold in '{s}': {e}")))?;

        Ok(Self {
            metric: caps["metric"].to_string(),
            comparator: caps["op"].parse()?,
            threshold,
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.comparator.symbol(), self.threshold)
    }
}

/// The condition a rule evaluates
///
/// Rules defined from text keep their expression even when it cannot be
/// parsed; such a rule stays in rotation and never fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// A well-formed comparison
    Predicate(Predicate),
    /// Expression text that failed to parse
    Unparsed {
        /// The expression as written
        raw: String,
        /// Why parsing failed
        reason: String,
    },
}

/// An alert rule definition
#[derive(Debug, Clone)]
pub struct AlertRule {
    /// Unique name
    pub name: String,

    /// Condition to evaluate
    pub condition: Condition,

    /// How long the condition must hold before the alert fires
    pub for_duration: Duration,

    /// Alert severity
    pub severity: Severity,

    /// Identifying labels, part of the fingerprint
    pub labels: BTreeMap<String, String>,

    /// Free-form annotations (summary, description, runbook, ...)
    pub annotations: BTreeMap<String, String>,
}

impl AlertRule {
    /// Create a rule from a typed predicate
    pub fn new(name: impl Into<String>, predicate: Predicate, severity: Severity) -> Self {
        Self {
            name: name.into(),
            condition: Condition::Predicate(predicate),
            for_duration: Duration::ZERO,
            severity,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Create a rule from expression text such as `"cpu_usage > 80"`
    ///
    /// Never fails: an expression that does not parse yields a rule whose
    /// evaluation is always "not firing".
    pub fn from_expression(name: impl Into<String>, expr: &str, severity: Severity) -> Self {
        let condition = match expr.parse::<Predicate>() {
            Ok(predicate) => Condition::Predicate(predicate),
            Err(e) => Condition::Unparsed {
                raw: expr.to_string(),
                reason: e.to_string(),
            },
        };

        Self {
            name: name.into(),
            condition,
            for_duration: Duration::ZERO,
            severity,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Add a label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Set the minimum duration before firing
    #[must_use]
    pub fn with_for(mut self, duration: Duration) -> Self {
        self.for_duration = duration;
        self
    }

    /// The predicate, if the expression parsed
    pub fn predicate(&self) -> Option<&Predicate> {
        match &self.condition {
            Condition::Predicate(p) => Some(p),
            Condition::Unparsed { .. } => None,
        }
    }

    /// The expression as text
    pub fn expression(&self) -> String {
        match &self.condition {
            Condition::Predicate(p) => p.to_string(),
            Condition::Unparsed { raw, .. } => raw.clone(),
        }
    }

    /// Dedup key for alerts raised by this rule
    pub fn fingerprint(&self) -> String {
        fingerprint(
            &self.name,
            self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
    }
}

/// Compute the fingerprint for a rule name and label set
///
/// Labels are sorted before hashing, so insertion order does not matter.
pub fn fingerprint<'a>(name: &str, labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut pairs: Vec<(&str, &str)> = labels.into_iter().collect();
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    for (key, value) in pairs {
        hasher.update([0x1f]);
        hasher.update(key.as_bytes());
        hasher.update([0x1e]);
        hasher.update(value.as_bytes());
    }

    hex::encode(&hasher.finalize()[..16])
}

/// A live or recently resolved alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier
    pub id: Uuid,

    /// Name of the rule that raised it
    pub name: String,

    /// Severity level
    pub severity: Severity,

    /// Current status
    pub status: AlertStatus,

    /// Human-readable description
    pub description: String,

    /// Expression of the originating rule
    pub expression: String,

    /// Observed value when the alert fired
    pub value: f64,

    /// Threshold of the originating rule
    pub threshold: f64,

    /// Rule labels
    pub labels: BTreeMap<String, String>,

    /// Rule annotations
    pub annotations: BTreeMap<String, String>,

    /// When the alert started firing
    pub starts_at: DateTime<Utc>,

    /// When the alert was resolved
    pub ends_at: Option<DateTime<Utc>>,

    /// Dedup key
    pub fingerprint: String,

    /// When the current silence lapses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silenced_until: Option<DateTime<Utc>>,
}

impl Alert {
    /// Create a firing alert for a rule
    pub fn firing(rule: &AlertRule, value: f64, threshold: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: rule.name.clone(),
            severity: rule.severity,
            status: AlertStatus::Firing,
            description: describe(rule, value, threshold),
            expression: rule.expression(),
            value,
            threshold,
            labels: rule.labels.clone(),
            annotations: rule.annotations.clone(),
            starts_at: now,
            ends_at: None,
            fingerprint: rule.fingerprint(),
            silenced_until: None,
        }
    }

    /// Mark the alert resolved
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Resolved;
        self.ends_at = Some(now);
        self.silenced_until = None;
    }

    /// Whether the alert is currently firing
    pub fn is_firing(&self) -> bool {
        self.status == AlertStatus::Firing
    }
}

fn describe(rule: &AlertRule, value: f64, threshold: f64) -> String {
    if let Some(description) = rule.annotations.get("description") {
        return description.clone();
    }

    match rule.predicate() {
        Some(p) => format!(
            "{} {} threshold of {:.2} (current value: {:.2})",
            p.metric,
            p.comparator.verb(),
            threshold,
            value
        ),
        None => format!("{} is firing (current value: {:.2})", rule.name, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("cpu_usage > 80", "cpu_usage", Comparator::Gt, 80.0)]
    #[case("memory_free<1024", "memory_free", Comparator::Lt, 1024.0)]
    #[case("  disk_used >= 0.95 ", "disk_used", Comparator::Gte, 0.95)]
    #[case("queue_depth <= -3", "queue_depth", Comparator::Lte, -3.0)]
    #[case("up == 0", "up", Comparator::Eq, 0.0)]
    #[case("rate(http_errors_total[5m]) > 5", "rate(http_errors_total[5m])", Comparator::Gt, 5.0)]
    fn test_parse_expression(
        #[case] expr: &str,
        #[case] metric: &str,
        #[case] comparator: Comparator,
        #[case] threshold: f64,
    ) {
        let predicate: Predicate = expr.parse().unwrap();
        assert_eq!(predicate.metric, metric);
        assert_eq!(predicate.comparator, comparator);
        assert!((predicate.threshold - threshold).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case("cpu_usage")]
    #[case("cpu_usage > high")]
    #[case("> 80")]
    #[case("cpu_usage != 80")]
    #[case("")]
    fn test_parse_expression_rejects(#[case] expr: &str) {
        assert!(expr.parse::<Predicate>().is_err());
    }

    #[test]
    fn test_unparsed_rule_is_kept() {
        let rule = AlertRule::from_expression("broken", "cpu_usage is high", Severity::High);

        assert!(rule.predicate().is_none());
        assert_eq!(rule.expression(), "cpu_usage is high");
    }

    #[test]
    fn test_comparator_eq_uses_epsilon() {
        assert!(Comparator::Eq.compare(0.1 + 0.2, 0.3));
        assert!(!Comparator::Eq.compare(0.31, 0.3));
    }

    #[test]
    fn test_fingerprint_ignores_label_order() {
        let a = AlertRule::from_expression("HighCpu", "cpu > 80", Severity::High)
            .with_label("team", "core")
            .with_label("env", "prod");
        let b = AlertRule::from_expression("HighCpu", "cpu > 90", Severity::Low)
            .with_label("env", "prod")
            .with_label("team", "core");

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_labels() {
        let a = fingerprint("HighCpu", [("env", "prod")]);
        let b = fingerprint("HighCpu", [("env", "staging")]);
        let c = fingerprint("HighCpuX", [("env", "prod")]);

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_description_prefers_annotation() {
        let rule = AlertRule::from_expression("HighCpu", "cpu > 80", Severity::High)
            .with_annotation("description", "CPU is pegged");
        let alert = Alert::firing(&rule, 95.0, 80.0, Utc::now());

        assert_eq!(alert.description, "CPU is pegged");
        assert_eq!(alert.expression, "cpu > 80");
    }

    proptest! {
        #[test]
        fn prop_fingerprint_order_independent(
            name in "[A-Za-z]{1,12}",
            labels in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..6),
        ) {
            let forward: Vec<(&str, &str)> =
                labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let mut reversed = forward.clone();
            reversed.reverse();

            prop_assert_eq!(fingerprint(&name, forward), fingerprint(&name, reversed));
        }
    }
}
