//! Capacity report aggregation

use chrono::{DateTime, Utc};

use crate::models::{CapacityForecast, CapacityMetric, CapacityReport, Recommendations, RiskLevel, Trend};

use super::forecast::RAPID_GROWTH;

const IMMEDIATE_UTILIZATION: f64 = 90.0;
const SHORT_TERM_UTILIZATION: f64 = 75.0;
const CRITICAL_RISK_UTILIZATION: f64 = 85.0;
const SHORT_TERM_GROWTH: f64 = 10.0;
const NEAR_TERM_DAYS: u32 = 7;
const MEDIUM_TERM_DAYS: u32 = 30;
const MEDIUM_RISK_GROWERS: usize = 2;

/// Combine current metrics and forecasts into a report
pub fn build_report(
    metrics: Vec<CapacityMetric>,
    forecasts: Vec<CapacityForecast>,
    now: DateTime<Utc>,
) -> CapacityReport {
    let mut recommendations = Recommendations::default();
    for metric in &metrics {
        bucket(metric, &mut recommendations);
    }

    CapacityReport {
        generated_at: now,
        risk_level: risk_level(&metrics),
        metrics,
        forecasts,
        recommendations,
    }
}

/// Overall risk across all resources
pub fn risk_level(metrics: &[CapacityMetric]) -> RiskLevel {
    if metrics.iter().any(|m| m.utilization >= CRITICAL_RISK_UTILIZATION) {
        return RiskLevel::Critical;
    }

    if metrics.iter().any(|m| within(m.days_until_critical, NEAR_TERM_DAYS)) {
        return RiskLevel::High;
    }

    let growers = metrics.iter().filter(|m| m.growth_rate > RAPID_GROWTH).count();
    if growers > MEDIUM_RISK_GROWERS {
        return RiskLevel::Medium;
    }

    RiskLevel::Low
}

fn within(days: Option<u32>, limit: u32) -> bool {
    days.is_some_and(|d| d <= limit)
}

fn bucket(metric: &CapacityMetric, out: &mut Recommendations) {
    let resource = &metric.resource;

    if metric.utilization >= IMMEDIATE_UTILIZATION || within(metric.days_until_critical, NEAR_TERM_DAYS) {
        let text = match metric.days_until_critical {
            Some(days) if metric.utilization < IMMEDIATE_UTILIZATION => format!(
                "Expand {resource} now: critical capacity projected in {days} days"
            ),
            _ => format!(
                "Expand {resource} now: at {:.1}% of critical capacity",
                metric.utilization
            ),
        };
        out.immediate.push(text);
    } else if metric.utilization >= SHORT_TERM_UTILIZATION || metric.growth_rate > SHORT_TERM_GROWTH {
        out.short_term.push(format!(
            "Plan expansion of {resource}: {:.1}% utilized, growing {:.1}% per day",
            metric.utilization, metric.growth_rate
        ));
    } else if within(metric.days_until_critical, MEDIUM_TERM_DAYS) {
        let days = metric.days_until_critical.unwrap_or(MEDIUM_TERM_DAYS);
        out.medium_term.push(format!(
            "Review {resource} capacity: critical level projected in {days} days"
        ));
    } else if metric.trend == Trend::Increasing {
        out.long_term.push(format!(
            "Monitor {resource}: growing {:.1}% per day",
            metric.growth_rate
        ));
    }
}
