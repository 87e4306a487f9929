//! End-to-end scenarios through the public API

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use vigil::config::{AlertRuleConfig, AlertingConfig, CapacityConfig};
use vigil::notify::NotificationError;
use vigil::prelude::*;

/// Replays a fixed sequence of samples per metric, repeating the last one
#[derive(Default)]
struct ScriptedSource {
    samples: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl ScriptedSource {
    fn with(self, metric: &str, values: &[f64]) -> Self {
        self.samples
            .lock()
            .insert(metric.to_string(), values.iter().copied().collect());
        self
    }
}

#[async_trait]
impl MetricSource for ScriptedSource {
    async fn get(&self, metric: &str) -> std::result::Result<f64, MetricError> {
        let mut samples = self.samples.lock();
        let queue = samples
            .get_mut(metric)
            .ok_or_else(|| MetricError::NotFound(metric.to_string()))?;
        let value = if queue.len() > 1 { queue.pop_front() } else { queue.front().copied() };
        value.ok_or_else(|| MetricError::Unavailable(metric.to_string()))
    }
}

#[derive(Clone, Default)]
struct Recorder {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl Recorder {
    fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl NotificationDispatcher for Recorder {
    async fn send(&self, notification: &Notification) -> std::result::Result<(), NotificationError> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

fn cpu_only() -> Config {
    let rule: AlertRuleConfig = serde_json::from_value(serde_json::json!({
        "name": "HighCpuUsage",
        "expr": "cpu_usage > 80",
        "severity": "high",
        "labels": { "team": "infra" }
    }))
    .unwrap();

    Config {
        alerting: AlertingConfig {
            rules: vec![rule],
            ..AlertingConfig::default()
        },
        capacity: CapacityConfig {
            thresholds: vec![],
            ..CapacityConfig::default()
        },
        ..Config::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_cpu_alert_fires_once_and_resolves() {
    let source = ScriptedSource::default().with("cpu_usage", &[60.0, 85.0, 85.0, 70.0]);
    let recorder = Recorder::default();
    let monitor = Monitor::with_dispatcher(&cpu_only(), Arc::new(source), Arc::new(recorder.clone())).unwrap();

    monitor.start().unwrap();

    // ticks land at 30s, 60s, 90s and 120s
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(recorder.kinds(), vec![NotificationKind::AlertFired]);
    assert_eq!(monitor.alerts().active_alerts().len(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(
        recorder.kinds(),
        vec![NotificationKind::AlertFired, NotificationKind::AlertResolved]
    );
    let history = monitor.alerts().alert_history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AlertStatus::Resolved);
    assert!(monitor.alerts().active_alerts().is_empty());

    {
        let sent = recorder.sent.lock();
        assert_eq!(sent[0].severity, Severity::High);
        assert_eq!(sent[0].data["value"], 85.0);
        assert_eq!(sent[0].data["labels"]["team"], "infra");
    }

    monitor.shutdown().await;
}

#[tokio::test]
async fn test_capacity_report_flags_imminent_breach() {
    let config = Config {
        alerting: AlertingConfig {
            rules: vec![],
            ..AlertingConfig::default()
        },
        capacity: CapacityConfig {
            thresholds: vec![
                CapacityThreshold::new("disk", "disk_usage", 80.0, 100.0, "%"),
                CapacityThreshold::new("memory", "memory_usage", 75.0, 90.0, "%"),
            ],
            ..CapacityConfig::default()
        },
        ..Config::default()
    };
    let source = Arc::new(ScriptedSource::default().with("disk_usage", &[55.0]).with("memory_usage", &[30.0]));
    let recorder = Recorder::default();
    let clock = ManualClock::new(Utc::now());
    let monitor =
        Monitor::with_clock(&config, source, Arc::new(recorder.clone()), Arc::new(clock.clone())).unwrap();

    let planner = monitor.capacity();
    let yesterday = clock.now() - chrono::Duration::days(1);
    planner.record("disk", DataPoint::new(yesterday, 50.0)).unwrap();
    planner.record("memory", DataPoint::new(yesterday, 30.0)).unwrap();

    let summary = planner.collect_all().await;
    assert_eq!(summary.collected, 2);

    let report = planner.run_forecasts().await;

    assert_eq!(report.risk_level, RiskLevel::High);
    assert_eq!(report.recommendations.immediate.len(), 1);
    assert!(report.recommendations.immediate[0].contains("disk"));
    assert_eq!(recorder.kinds(), vec![NotificationKind::ForecastCritical]);

    let disk = planner.forecast_resource("disk", 10).unwrap();
    assert_eq!(disk.first_breach(100.0), Some(7));
    assert!(matches!(
        planner.forecast_resource("gpu", 10),
        Err(Error::NotFound { .. })
    ));
}
