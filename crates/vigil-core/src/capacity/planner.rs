//! Capacity planning service
//!
//! Samples every tracked resource on one schedule and recomputes forecasts
//! on another. Threshold breaches and near-term forecast breaches are sent
//! to the notification dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CapacityConfig;
use crate::error::{Error, Result};
use crate::models::{CapacityForecast, CapacityMetric, CapacityReport, CapacityThreshold, DataPoint, Severity};
use crate::notify::{dispatch, Notification, NotificationDispatcher, NotificationKind};
use crate::schedule::Schedule;
use crate::source::{fetch_with_timeout, MetricSource};

use super::forecast::{derive_metric, forecast};
use super::report::build_report;
use super::store::HistoryStore;

/// Summary of one collection tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    /// Resources sampled successfully
    pub collected: usize,
    /// Resources skipped because their metric could not be fetched
    pub errored: usize,
}

struct Inner {
    thresholds: RwLock<Vec<CapacityThreshold>>,
    history: HistoryStore,
    source: Arc<dyn MetricSource>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    horizon_days: u32,
    near_term_days: u32,
    cooldown: Option<chrono::Duration>,
    last_notified: Mutex<HashMap<(String, NotificationKind), DateTime<Utc>>>,
    latest_report: RwLock<Option<CapacityReport>>,
}

/// Tracks resource usage over time and forecasts exhaustion
pub struct CapacityPlanner {
    inner: Arc<Inner>,
    collection_interval: Duration,
    forecast_interval: Duration,
    schedule: Mutex<Option<Schedule>>,
}

impl CapacityPlanner {
    /// Create a planner using the system clock
    pub fn new(
        config: &CapacityConfig,
        source: Arc<dyn MetricSource>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Result<Self> {
        Self::with_clock(config, source, dispatcher, Arc::new(SystemClock))
    }

    /// Create a planner with an explicit clock
    pub fn with_clock(
        config: &CapacityConfig,
        source: Arc<dyn MetricSource>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let retention = chrono_duration(config.history_retention, "capacity.history_retention")?;
        let cooldown = config
            .threshold_cooldown
            .map(|c| chrono_duration(c, "capacity.threshold_cooldown"))
            .transpose()?;

        let inner = Inner {
            thresholds: RwLock::new(Vec::new()),
            history: HistoryStore::new(retention),
            source,
            dispatcher,
            clock,
            fetch_timeout: config.fetch_timeout,
            horizon_days: config.forecast_horizon_days,
            near_term_days: config.near_term_days,
            cooldown,
            last_notified: Mutex::new(HashMap::new()),
            latest_report: RwLock::new(None),
        };
        for threshold in &config.thresholds {
            inner.add_threshold(threshold.clone())?;
        }

        Ok(Self {
            inner: Arc::new(inner),
            collection_interval: config.collection_interval,
            forecast_interval: config.forecast_interval,
            schedule: Mutex::new(None),
        })
    }

    /// Start the collection and forecasting loops
    pub fn start(&self) -> Result<()> {
        let mut slot = self.schedule.lock();
        if slot.as_ref().is_some_and(|s| !s.is_stopped()) {
            return Err(Error::validation("capacity planner is already running"));
        }

        info!(
            resources = self.inner.thresholds.read().len(),
            collection_interval = ?self.collection_interval,
            forecast_interval = ?self.forecast_interval,
            "Starting capacity planner"
        );

        let mut schedule = Schedule::new();

        let inner = self.inner.clone();
        schedule.every("capacity-collection", self.collection_interval, move || {
            let inner = inner.clone();
            async move {
                inner.collect_all().await;
            }
        });

        let inner = self.inner.clone();
        schedule.every("capacity-forecast", self.forecast_interval, move || {
            let inner = inner.clone();
            async move {
                inner.run_forecasts().await;
            }
        });

        *slot = Some(schedule);
        Ok(())
    }

    /// Stop scheduling ticks; running ticks are left to finish
    pub fn stop(&self) {
        if let Some(schedule) = self.schedule.lock().as_ref() {
            schedule.stop();
            info!("Capacity planner stopped");
        }
    }

    /// Stop and wait for running ticks to finish
    pub async fn shutdown(&self) {
        let schedule = self.schedule.lock().take();
        if let Some(schedule) = schedule {
            schedule.shutdown().await;
            info!("Capacity planner shut down");
        }
    }

    /// Sample one resource, record it and check its thresholds
    pub async fn collect(&self, threshold: &CapacityThreshold) -> Result<f64> {
        self.inner.collect(threshold).await
    }

    /// Sample every tracked resource now
    pub async fn collect_all(&self) -> CollectionSummary {
        self.inner.collect_all().await
    }

    /// Record an externally sampled point without threshold checks
    pub fn record(&self, resource: &str, point: DataPoint) -> Result<()> {
        self.inner.threshold(resource)?;
        if !point.value.is_finite() {
            return Err(Error::validation(format!(
                "sample {} for '{resource}' is not finite",
                point.value
            )));
        }
        self.inner.history.append(resource, point, self.inner.clock.now());
        Ok(())
    }

    /// Notify if `value` is at or above a threshold level
    pub async fn check_threshold(&self, threshold: &CapacityThreshold, value: f64) {
        self.inner.check_threshold(threshold, value).await;
    }

    /// Current state of every resource with history
    pub fn current_metrics(&self) -> Vec<CapacityMetric> {
        self.inner.current_metrics()
    }

    /// Forecast one resource `days` ahead
    pub fn forecast_resource(&self, resource: &str, days: u32) -> Result<CapacityForecast> {
        self.inner.forecast_resource(resource, days)
    }

    /// Build a report over every resource and keep it as the latest
    pub fn generate_report(&self) -> CapacityReport {
        self.inner.generate_report()
    }

    /// Run one forecasting pass now, notifying near-term critical breaches
    pub async fn run_forecasts(&self) -> CapacityReport {
        self.inner.run_forecasts().await
    }

    /// The most recently generated report
    pub fn latest_report(&self) -> Option<CapacityReport> {
        self.inner.latest_report.read().clone()
    }

    /// Start tracking a resource
    pub fn add_threshold(&self, threshold: CapacityThreshold) -> Result<()> {
        let resource = threshold.resource.clone();
        self.inner.add_threshold(threshold)?;
        info!(resource = %resource, "Added capacity threshold");
        Ok(())
    }

    /// Stop tracking a resource and drop its history
    pub fn remove_threshold(&self, resource: &str) -> bool {
        let removed = {
            let mut thresholds = self.inner.thresholds.write();
            let before = thresholds.len();
            thresholds.retain(|t| t.resource != resource);
            thresholds.len() != before
        };

        if removed {
            self.inner.history.remove(resource);
            self.inner.last_notified.lock().retain(|(r, _), _| r != resource);
            info!(resource = %resource, "Removed capacity threshold");
        }
        removed
    }

    /// Tracked resources
    pub fn thresholds(&self) -> Vec<CapacityThreshold> {
        self.inner.thresholds.read().clone()
    }

    /// History of a resource, oldest first
    pub fn history(&self, resource: &str) -> Vec<DataPoint> {
        self.inner.history.history(resource)
    }
}

impl Drop for CapacityPlanner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn threshold(&self, resource: &str) -> Result<CapacityThreshold> {
        self.thresholds
            .read()
            .iter()
            .find(|t| t.resource == resource)
            .cloned()
            .ok_or_else(|| Error::not_found("capacity threshold", resource))
    }

    fn add_threshold(&self, threshold: CapacityThreshold) -> Result<()> {
        if threshold.critical <= 0.0 || threshold.warning >= threshold.critical {
            return Err(Error::validation(format!(
                "capacity resource '{}' needs 0 < warning < critical",
                threshold.resource
            )));
        }

        let mut thresholds = self.thresholds.write();
        if thresholds.iter().any(|t| t.resource == threshold.resource) {
            return Err(Error::validation(format!(
                "capacity resource '{}' already exists",
                threshold.resource
            )));
        }
        thresholds.push(threshold);
        Ok(())
    }

    async fn collect(&self, threshold: &CapacityThreshold) -> Result<f64> {
        let value = fetch_with_timeout(self.source.as_ref(), &threshold.metric, self.fetch_timeout).await?;

        let now = self.clock.now();
        self.history.append(&threshold.resource, DataPoint::new(now, value), now);
        debug!(resource = %threshold.resource, value, "Collected capacity sample");

        self.check_threshold(threshold, value).await;
        Ok(value)
    }

    async fn collect_all(&self) -> CollectionSummary {
        let thresholds = self.thresholds.read().clone();
        let mut summary = CollectionSummary::default();

        for threshold in &thresholds {
            match self.collect(threshold).await {
                Ok(_) => summary.collected += 1,
                Err(e) => {
                    summary.errored += 1;
                    error!(
                        resource = %threshold.resource,
                        metric = %threshold.metric,
                        error = %e,
                        "Error collecting capacity metric"
                    );
                }
            }
        }

        debug!(
            collected = summary.collected,
            errored = summary.errored,
            "Capacity collection complete"
        );
        summary
    }

    async fn check_threshold(&self, threshold: &CapacityThreshold, value: f64) {
        let (kind, severity, level, label) = if value >= threshold.critical {
            (NotificationKind::CapacityCritical, Severity::Critical, threshold.critical, "critical")
        } else if value >= threshold.warning {
            (NotificationKind::CapacityWarning, Severity::High, threshold.warning, "warning")
        } else {
            self.last_notified.lock().retain(|(r, _), _| r != &threshold.resource);
            return;
        };

        if !self.should_notify(&threshold.resource, kind) {
            debug!(resource = %threshold.resource, ?kind, "Capacity notification in cooldown");
            return;
        }

        warn!(
            resource = %threshold.resource,
            value,
            threshold = level,
            "Capacity {label} threshold reached"
        );

        let unit = &threshold.unit;
        let notification = Notification::new(
            kind,
            format!("Capacity {label}: {}", threshold.resource),
            format!(
                "{} is at {value:.1}{unit}, at or above its {label} threshold of {level}{unit}",
                threshold.resource
            ),
            severity,
        )
        .with_data("resource", threshold.resource.clone())
        .with_data("metric", threshold.metric.clone())
        .with_data("value", value)
        .with_data("threshold", level)
        .with_data("unit", threshold.unit.clone());

        dispatch(self.dispatcher.as_ref(), notification).await;
    }

    /// Records the send when one is due
    fn should_notify(&self, resource: &str, kind: NotificationKind) -> bool {
        let Some(cooldown) = self.cooldown else {
            return true;
        };

        let now = self.clock.now();
        let mut last = self.last_notified.lock();
        let key = (resource.to_string(), kind);
        if last.get(&key).is_some_and(|at| now - *at < cooldown) {
            return false;
        }
        last.insert(key, now);
        true
    }

    fn current_metrics(&self) -> Vec<CapacityMetric> {
        let thresholds = self.thresholds.read().clone();
        thresholds
            .iter()
            .filter_map(|t| derive_metric(t, &self.history.history(&t.resource)))
            .collect()
    }

    fn forecast_resource(&self, resource: &str, days: u32) -> Result<CapacityForecast> {
        let threshold = self.threshold(resource)?;
        let history = self.history.history(resource);
        forecast(&threshold, &history, days, self.clock.now())
            .ok_or_else(|| Error::not_found("capacity history", resource))
    }

    fn generate_report(&self) -> CapacityReport {
        let thresholds = self.thresholds.read().clone();
        let now = self.clock.now();

        let mut metrics = Vec::new();
        let mut forecasts = Vec::new();
        for threshold in &thresholds {
            let history = self.history.history(&threshold.resource);
            if let Some(metric) = derive_metric(threshold, &history) {
                metrics.push(metric);
            }
            if let Some(forecast) = forecast(threshold, &history, self.horizon_days, now) {
                forecasts.push(forecast);
            }
        }

        let report = build_report(metrics, forecasts, now);
        if report.recommendations.is_empty() {
            debug!(resources = report.metrics.len(), "Generated capacity report, nothing to recommend");
        } else {
            info!(
                resources = report.metrics.len(),
                risk = ?report.risk_level,
                immediate = report.recommendations.immediate.len(),
                recommendations = report.recommendations.len(),
                "Generated capacity report"
            );
        }

        *self.latest_report.write() = Some(report.clone());
        report
    }

    async fn run_forecasts(&self) -> CapacityReport {
        let report = self.generate_report();
        let thresholds = self.thresholds.read().clone();

        for forecast in &report.forecasts {
            let Some(threshold) = thresholds.iter().find(|t| t.resource == forecast.resource) else {
                continue;
            };
            let current = self.history.latest(&threshold.resource).map_or(0.0, |p| p.value);
            // already covered by the threshold check
            if current >= threshold.critical {
                continue;
            }

            let Some(day) = forecast.first_breach(threshold.critical) else {
                continue;
            };
            if day > self.near_term_days {
                continue;
            }

            warn!(resource = %threshold.resource, days = day, "Critical capacity forecast");
            let notification = Notification::new(
                NotificationKind::ForecastCritical,
                format!("Capacity forecast: {}", threshold.resource),
                format!(
                    "{} is projected to reach its critical threshold of {}{} in {day} days",
                    threshold.resource, threshold.critical, threshold.unit
                ),
                Severity::High,
            )
            .with_data("resource", threshold.resource.clone())
            .with_data("days_until_critical", day)
            .with_data("threshold", threshold.critical)
            .with_data("recommendations", forecast.recommendations.clone());

            dispatch(self.dispatcher.as_ref(), notification).await;
        }

        info!(
            resources = report.metrics.len(),
            risk = ?report.risk_level,
            "Capacity forecasts updated"
        );
        report
    }
}

fn chrono_duration(duration: Duration, name: &str) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration).map_err(|e| Error::config(format!("{name} out of range: {e}")))
}
