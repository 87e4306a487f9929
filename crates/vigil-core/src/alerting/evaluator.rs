//! Alert rule evaluation

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{AlertRule, Condition};
use crate::source::{fetch_with_timeout, MetricSource};

/// Outcome of evaluating one rule once
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Whether the condition holds
    pub firing: bool,
    /// Observed metric value
    pub value: f64,
    /// Threshold compared against
    pub threshold: f64,
}

impl Evaluation {
    fn not_firing() -> Self {
        Self {
            firing: false,
            value: 0.0,
            threshold: 0.0,
        }
    }
}

/// Evaluates rules against a metric source
#[derive(Clone)]
pub struct RuleEvaluator {
    source: Arc<dyn MetricSource>,
    fetch_timeout: Duration,
}

impl RuleEvaluator {
    /// Create an evaluator
    pub fn new(source: Arc<dyn MetricSource>, fetch_timeout: Duration) -> Self {
        Self {
            source,
            fetch_timeout,
        }
    }

    /// Evaluate a single rule
    ///
    /// A rule whose expression did not parse is reported as not firing.
    /// Metric source failures and timeouts are returned as errors.
    pub async fn evaluate(&self, rule: &AlertRule) -> Result<Evaluation> {
        let predicate = match &rule.condition {
            Condition::Predicate(p) => p,
            Condition::Unparsed { raw, reason } => {
                warn!(
                    rule = %rule.name,
                    expression = %raw,
                    reason = %reason,
                    "Unparsable rule expression, treating as not firing"
                );
                return Ok(Evaluation::not_firing());
            }
        };

        let value = fetch_with_timeout(self.source.as_ref(), &predicate.metric, self.fetch_timeout).await?;
        let firing = predicate.check(value);

        debug!(
            rule = %rule.name,
            metric = %predicate.metric,
            value,
            threshold = predicate.threshold,
            firing,
            "Evaluated rule"
        );

        Ok(Evaluation {
            firing,
            value,
            threshold: predicate.threshold,
        })
    }
}
