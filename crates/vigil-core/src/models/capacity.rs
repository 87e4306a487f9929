//! Capacity planning data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Warning/critical levels for a tracked resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityThreshold {
    /// Resource name (unique)
    pub resource: String,

    /// Metric identifier handed to the metric source
    pub metric: String,

    /// Warning level
    pub warning: f64,

    /// Critical level, also the resource ceiling
    pub critical: f64,

    /// Display unit (e.g. "%", "GB", "connections")
    #[serde(default)]
    pub unit: String,

    /// Expected growth in percent per day, if known
    #[serde(default)]
    pub expected_daily_growth: Option<f64>,
}

impl CapacityThreshold {
    /// Create a threshold
    pub fn new(
        resource: impl Into<String>,
        metric: impl Into<String>,
        warning: f64,
        critical: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            metric: metric.into(),
            warning,
            critical,
            unit: unit.into(),
            expected_daily_growth: None,
        }
    }

    /// Set the expected daily growth
    #[must_use]
    pub fn with_expected_growth(mut self, percent_per_day: f64) -> Self {
        self.expected_daily_growth = Some(percent_per_day);
        self
    }
}

/// A single sample in a resource's history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Sampled value
    pub value: f64,
}

impl DataPoint {
    /// Create a data point
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Direction of a resource's growth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Growing faster than 0.5%/day
    Increasing,
    /// Shrinking faster than 0.5%/day
    Decreasing,
    /// Neither
    Stable,
}

/// Current state of a tracked resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityMetric {
    /// Resource name
    pub resource: String,
    /// Latest sampled value
    pub current: f64,
    /// The critical threshold
    pub ceiling: f64,
    /// Current value as a percentage of the ceiling
    pub utilization: f64,
    /// Direction of growth
    pub trend: Trend,
    /// Percent per day
    pub growth_rate: f64,
    /// Whole days until the warning level, when growing towards it
    pub days_until_warning: Option<u32>,
    /// Whole days until the critical level, when growing towards it
    pub days_until_critical: Option<u32>,
}

/// One day of a forecast
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Day the prediction is for
    pub date: DateTime<Utc>,
    /// Projected value
    pub value: f64,
    /// In [0.5, 1.0]
    pub confidence: f64,
}

/// Projected trajectory of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityForecast {
    /// Resource name
    pub resource: String,
    /// Horizon in days
    pub horizon: u32,
    /// One prediction per day, nearest first
    pub predictions: Vec<Prediction>,
    /// Suggested actions
    pub recommendations: Vec<String>,
}

impl CapacityForecast {
    /// Day index (1-based) of the first prediction at or above `level`
    pub fn first_breach(&self, level: f64) -> Option<u32> {
        self.predictions
            .iter()
            .position(|p| p.value >= level)
            .and_then(|i| u32::try_from(i + 1).ok())
    }
}

/// Overall capacity risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Nothing needs attention
    Low,
    /// Several resources are growing fast
    Medium,
    /// A resource will reach critical within a week
    High,
    /// A resource is at 85% of critical or more
    Critical,
}

/// Recommendations bucketed by urgency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    /// Act now
    pub immediate: Vec<String>,
    /// Act within weeks
    pub short_term: Vec<String>,
    /// Act within the month
    pub medium_term: Vec<String>,
    /// Keep an eye on
    pub long_term: Vec<String>,
}

impl Recommendations {
    /// Total number of recommendations
    pub fn len(&self) -> usize {
        self.immediate.len() + self.short_term.len() + self.medium_term.len() + self.long_term.len()
    }

    /// Whether there are no recommendations
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Aggregated capacity report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityReport {
    /// When the report was built
    pub generated_at: DateTime<Utc>,
    /// Current state of every resource with history
    pub metrics: Vec<CapacityMetric>,
    /// Forecast per resource
    pub forecasts: Vec<CapacityForecast>,
    /// Recommendations by urgency
    pub recommendations: Recommendations,
    /// Overall risk
    pub risk_level: RiskLevel,
}
