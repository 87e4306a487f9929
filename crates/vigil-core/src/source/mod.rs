//! Metric sources
//!
//! The engine never talks to a metrics backend directly; it asks a
//! [`MetricSource`] for the current value of a metric identifier.

mod prometheus;

pub use prometheus::PrometheusMetricSource;

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

/// Errors surfaced by a metric source
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    /// The source has no such metric
    #[error("metric not found: {0}")]
    NotFound(String),

    /// The source could not be reached
    #[error("metric source unavailable: {0}")]
    Unavailable(String),

    /// The source answered with something that is not a usable number
    #[error("invalid value for metric {metric}: {reason}")]
    InvalidValue {
        /// Metric identifier
        metric: String,
        /// What was wrong with the value
        reason: String,
    },

    /// The source did not answer in time
    #[error("fetching {metric} timed out after {after:?}")]
    Timeout {
        /// Metric identifier
        metric: String,
        /// Timeout that elapsed
        after: Duration,
    },
}

/// Something that can report the current value of a metric
#[async_trait::async_trait]
pub trait MetricSource: Send + Sync {
    /// Fetch the current sample for `metric`
    async fn get(&self, metric: &str) -> Result<f64, MetricError>;
}

/// Fetch a metric, treating a slow source or a non-finite sample as a failure
pub async fn fetch_with_timeout(
    source: &dyn MetricSource,
    metric: &str,
    timeout: Duration,
) -> Result<f64, MetricError> {
    let value = match tokio::time::timeout(timeout, source.get(metric)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(MetricError::Timeout {
                metric: metric.to_string(),
                after: timeout,
            })
        }
    };

    if !value.is_finite() {
        return Err(MetricError::InvalidValue {
            metric: metric.to_string(),
            reason: format!("sample {value} is not finite"),
        });
    }
    Ok(value)
}

/// In-memory metric values, settable at runtime
#[derive(Debug, Default)]
pub struct StaticMetricSource {
    values: RwLock<HashMap<String, f64>>,
}

impl StaticMetricSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value reported for a metric
    pub fn set(&self, metric: impl Into<String>, value: f64) {
        self.values.write().insert(metric.into(), value);
    }

    /// Stop reporting a metric
    pub fn remove(&self, metric: &str) {
        self.values.write().remove(metric);
    }
}

#[async_trait::async_trait]
impl MetricSource for StaticMetricSource {
    async fn get(&self, metric: &str) -> Result<f64, MetricError> {
        self.values
            .read()
            .get(metric)
            .copied()
            .ok_or_else(|| MetricError::NotFound(metric.to_string()))
    }
}
