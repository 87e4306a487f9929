//! Growth rate, trend and forecast calculations
//!
//! Growth is measured with the endpoint method over a trailing window and
//! projected forward as daily compounding.

use chrono::{DateTime, Duration, Utc};

use crate::models::{CapacityForecast, CapacityMetric, CapacityThreshold, DataPoint, Prediction, Trend};

/// Most samples considered when measuring growth
pub const GROWTH_WINDOW: usize = 7 * 24;

/// Growth rate in percent per day above which a resource is flagged
pub const RAPID_GROWTH: f64 = 5.0;

const TREND_BAND: f64 = 0.5;
const MIN_CONFIDENCE: f64 = 0.5;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Percent change per day between the ends of the trailing window
///
/// Returns 0 when the window spans no time or starts at zero.
pub fn calculate_growth_rate(history: &[DataPoint]) -> f64 {
    let window = &history[history.len().saturating_sub(GROWTH_WINDOW)..];
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return 0.0;
    };

    let days = (last.timestamp - first.timestamp).num_milliseconds() as f64 / MILLIS_PER_DAY;
    if days == 0.0 || first.value == 0.0 {
        return 0.0;
    }

    ((last.value - first.value) / first.value * 100.0) / days
}

/// Classify a growth rate
pub fn classify_trend(rate: f64) -> Trend {
    if rate > TREND_BAND {
        Trend::Increasing
    } else if rate < -TREND_BAND {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Whole days until utilization compounds from `current` to `target`
///
/// Both utilizations are fractions of the ceiling. Only defined for
/// positive growth from a positive utilization below the target.
pub fn days_until(current: f64, target: f64, rate: f64) -> Option<u32> {
    if rate <= 0.0 || current <= 0.0 || current >= target {
        return None;
    }

    let days = ((target / current).ln() / (1.0 + rate / 100.0).ln()).ceil();
    if days.is_finite() && days >= 0.0 && days <= f64::from(u32::MAX) {
        Some(days as u32)
    } else {
        None
    }
}

/// Current state of a resource, or `None` without history
pub fn derive_metric(threshold: &CapacityThreshold, history: &[DataPoint]) -> Option<CapacityMetric> {
    let current = history.last()?.value;
    let rate = calculate_growth_rate(history);

    let utilization = current / threshold.critical;
    let warning_utilization = threshold.warning / threshold.critical;

    Some(CapacityMetric {
        resource: threshold.resource.clone(),
        current,
        ceiling: threshold.critical,
        utilization: utilization * 100.0,
        trend: classify_trend(rate),
        growth_rate: rate,
        days_until_warning: days_until(utilization, warning_utilization, rate),
        days_until_critical: days_until(utilization, 1.0, rate),
    })
}

/// Project a resource `days` ahead from its current value and growth rate
pub fn forecast(
    threshold: &CapacityThreshold,
    history: &[DataPoint],
    days: u32,
    now: DateTime<Utc>,
) -> Option<CapacityForecast> {
    let current = history.last()?.value;
    let rate = calculate_growth_rate(history);
    let horizon = f64::from(days);

    let predictions: Vec<Prediction> = (1..=days)
        .map(|i| {
            let step = f64::from(i);
            Prediction {
                date: now + Duration::days(i64::from(i)),
                value: current * (1.0 + rate / 100.0).powf(step),
                confidence: (1.0 - (step / horizon) * 0.5).max(MIN_CONFIDENCE),
            }
        })
        .collect();

    let mut recommendations = Vec::new();
    let unit = &threshold.unit;

    if let Some(last) = predictions.last() {
        if last.value >= threshold.critical {
            recommendations.push(format!(
                "URGENT: {} is projected to exceed its critical threshold ({}{unit}) within {days} days. Expand capacity immediately.",
                threshold.resource, threshold.critical
            ));
        } else if last.value >= threshold.warning {
            recommendations.push(format!(
                "Plan capacity expansion for {}: projected to reach its warning threshold ({}{unit}) within {days} days.",
                threshold.resource, threshold.warning
            ));
        }
    }

    if rate > RAPID_GROWTH {
        recommendations.push(format!(
            "{} is growing rapidly at {rate:.1}% per day. Investigate what is driving the growth.",
            threshold.resource
        ));
    }

    if let Some(expected) = threshold.expected_daily_growth {
        if rate > expected {
            recommendations.push(format!(
                "{} is growing at {rate:.1}% per day, above the expected {expected:.1}% per day.",
                threshold.resource
            ));
        }
    }

    Some(CapacityForecast {
        resource: threshold.resource.clone(),
        horizon: days,
        predictions,
        recommendations,
    })
}
