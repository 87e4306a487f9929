//! Alert state manager
//!
//! Owns the rule set and the live alert table, runs the periodic evaluation
//! loop, and turns state transitions into notifications.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::AlertingConfig;
use crate::error::{Error, Result};
use crate::models::{Alert, AlertRule};
use crate::notify::{dispatch, Notification, NotificationDispatcher, NotificationKind};
use crate::schedule::Schedule;
use crate::source::MetricSource;

use super::evaluator::RuleEvaluator;
use super::repository::{AlertStore, RuleStore, Transition};

/// Summary of one evaluation tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationSummary {
    /// Rules evaluated
    pub rules_evaluated: usize,
    /// Rules skipped because their metric could not be fetched
    pub rules_errored: usize,
    /// Fingerprints that started firing
    pub fired: Vec<String>,
    /// Fingerprints that resolved
    pub resolved: Vec<String>,
}

struct Inner {
    rules: RuleStore,
    alerts: AlertStore,
    evaluator: RuleEvaluator,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    resolved_retention: Duration,
}

/// Evaluates alert rules and tracks the alerts they raise
pub struct AlertManager {
    inner: Arc<Inner>,
    evaluation_interval: Duration,
    schedule: Mutex<Option<Schedule>>,
}

impl AlertManager {
    /// Create a manager using the system clock
    pub fn new(
        config: &AlertingConfig,
        source: Arc<dyn MetricSource>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Result<Self> {
        Self::with_clock(config, source, dispatcher, Arc::new(SystemClock))
    }

    /// Create a manager with an explicit clock
    pub fn with_clock(
        config: &AlertingConfig,
        source: Arc<dyn MetricSource>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let rules = RuleStore::new();
        for rule in &config.rules {
            rules.add(AlertRule::from(rule))?;
        }

        let inner = Inner {
            rules,
            alerts: AlertStore::new(),
            evaluator: RuleEvaluator::new(source, config.fetch_timeout),
            dispatcher,
            clock,
            resolved_retention: config.resolved_retention,
        };

        Ok(Self {
            inner: Arc::new(inner),
            evaluation_interval: config.evaluation_interval,
            schedule: Mutex::new(None),
        })
    }

    /// Start the periodic evaluation loop
    pub fn start(&self) -> Result<()> {
        let mut slot = self.schedule.lock();
        if slot.as_ref().is_some_and(|s| !s.is_stopped()) {
            return Err(Error::validation("alert manager is already running"));
        }

        info!(
            rules = self.inner.rules.len(),
            interval = ?self.evaluation_interval,
            "Starting alert manager"
        );

        let mut schedule = Schedule::new();
        let inner = self.inner.clone();
        schedule.every("alert-evaluation", self.evaluation_interval, move || {
            let inner = inner.clone();
            async move {
                inner.evaluate_all().await;
            }
        });

        *slot = Some(schedule);
        Ok(())
    }

    /// Stop scheduling evaluations; a running tick is left to finish
    pub fn stop(&self) {
        if let Some(schedule) = self.schedule.lock().as_ref() {
            schedule.stop();
            info!("Alert manager stopped");
        }
    }

    /// Stop and wait for a running tick to finish
    pub async fn shutdown(&self) {
        let schedule = self.schedule.lock().take();
        if let Some(schedule) = schedule {
            schedule.shutdown().await;
            info!("Alert manager shut down");
        }
    }

    /// Run one evaluation tick now
    pub async fn evaluate_all(&self) -> EvaluationSummary {
        self.inner.evaluate_all().await
    }

    /// All firing alerts
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.inner.alerts.firing()
    }

    /// Tracked alerts of any status, newest first
    pub fn alert_history(&self, limit: usize) -> Vec<Alert> {
        self.inner.alerts.history(limit)
    }

    /// Alert by fingerprint
    pub fn get_alert(&self, fingerprint: &str) -> Option<Alert> {
        self.inner.alerts.get(fingerprint)
    }

    /// Silence an alert for `duration`
    ///
    /// The alert reverts to firing once the duration elapses, whatever the
    /// state of its rule. No notification is sent on either transition. The
    /// revert timer runs on the runtime polling this call.
    pub async fn silence_alert(&self, id: Uuid, duration: Duration) -> Result<Alert> {
        let until = self.inner.clock.now()
            + chrono::Duration::from_std(duration)
                .map_err(|e| Error::validation(format!("silence duration out of range: {e}")))?;

        let alert = self.inner.alerts.silence(id, until)?;
        info!(alert_id = %id, name = %alert.name, until = %until, "Alert silenced");

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                if let Some(alert) = inner.alerts.unsilence(id, until) {
                    info!(alert_id = %id, name = %alert.name, "Silence expired, alert firing again");
                }
            }
        });

        Ok(alert)
    }

    /// Add a rule to rotation
    pub fn add_custom_rule(&self, rule: AlertRule) -> Result<()> {
        let name = rule.name.clone();
        self.inner.rules.add(rule)?;
        info!(rule = %name, "Added alert rule");
        Ok(())
    }

    /// Remove a rule from rotation
    ///
    /// Alerts already raised by the rule are left as they are; a pending
    /// condition is dropped.
    pub fn remove_rule(&self, name: &str) -> bool {
        let Some(rule) = self.inner.rules.remove(name) else {
            return false;
        };

        self.inner.alerts.clear_pending(&rule.fingerprint());
        info!(rule = %name, "Removed alert rule");
        true
    }

    /// Current rules
    pub fn rules(&self) -> Vec<AlertRule> {
        self.inner.rules.list()
    }
}

impl Drop for AlertManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    async fn evaluate_all(self: &Arc<Self>) -> EvaluationSummary {
        let rules = self.rules.list();
        let mut summary = EvaluationSummary::default();

        for rule in &rules {
            summary.rules_evaluated += 1;

            let evaluation = match self.evaluator.evaluate(rule).await {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    summary.rules_errored += 1;
                    error!(rule = %rule.name, error = %e, "Error evaluating rule");
                    continue;
                }
            };

            match self.alerts.apply(rule, &evaluation, self.clock.now()) {
                Transition::Fired(alert) => {
                    info!(
                        rule = %rule.name,
                        alert_id = %alert.id,
                        fingerprint = %alert.fingerprint,
                        severity = %alert.severity,
                        value = alert.value,
                        "Alert fired"
                    );
                    summary.fired.push(alert.fingerprint.clone());
                    dispatch(self.dispatcher.as_ref(), fired_notification(&alert)).await;
                }
                Transition::Resolved(alert) => {
                    info!(
                        rule = %rule.name,
                        alert_id = %alert.id,
                        fingerprint = %alert.fingerprint,
                        "Alert resolved"
                    );
                    summary.resolved.push(alert.fingerprint.clone());
                    self.schedule_purge(&alert);
                    dispatch(self.dispatcher.as_ref(), resolved_notification(&alert)).await;
                }
                Transition::Pending => {
                    debug!(rule = %rule.name, "Alert pending");
                }
                Transition::Unchanged => {}
            }
        }

        debug!(
            rules_evaluated = summary.rules_evaluated,
            rules_errored = summary.rules_errored,
            fired = summary.fired.len(),
            resolved = summary.resolved.len(),
            "Evaluation complete"
        );

        summary
    }

    fn schedule_purge(self: &Arc<Self>, alert: &Alert) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let fingerprint = alert.fingerprint.clone();
        let id = alert.id;
        let retention = self.resolved_retention;

        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.alerts.purge_resolved(&fingerprint, id) {
                debug!(alert_id = %id, fingerprint = %fingerprint, "Purged resolved alert");
            } else {
                warn!(alert_id = %id, fingerprint = %fingerprint, "Resolved alert already replaced");
            }
        });
    }
}

fn fired_notification(alert: &Alert) -> Notification {
    Notification::new(
        NotificationKind::AlertFired,
        format!("Alert: {}", alert.name),
        alert.description.clone(),
        alert.severity,
    )
    .with_data("alert_id", alert.id.to_string())
    .with_data("fingerprint", alert.fingerprint.clone())
    .with_data("expression", alert.expression.clone())
    .with_data("value", alert.value)
    .with_data("threshold", alert.threshold)
    .with_data("labels", json!(alert.labels))
    .with_data("starts_at", alert.starts_at.to_rfc3339())
}

fn resolved_notification(alert: &Alert) -> Notification {
    let ends_at = alert.ends_at.unwrap_or(alert.starts_at);
    let lasted = (ends_at - alert.starts_at).num_seconds();

    Notification::new(
        NotificationKind::AlertResolved,
        format!("Resolved: {}", alert.name),
        format!("{} resolved after {}s", alert.name, lasted),
        alert.severity,
    )
    .with_data("alert_id", alert.id.to_string())
    .with_data("fingerprint", alert.fingerprint.clone())
    .with_data("labels", json!(alert.labels))
    .with_data("starts_at", alert.starts_at.to_rfc3339())
    .with_data("ends_at", ends_at.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{AlertStatus, Severity};
    use chrono::Utc;
    use crate::notify::testing::RecordingDispatcher;
    use crate::source::StaticMetricSource;

    fn config() -> AlertingConfig {
        AlertingConfig {
            rules: vec![],
            ..AlertingConfig::default()
        }
    }

    fn manager(source: Arc<StaticMetricSource>, dispatcher: RecordingDispatcher) -> AlertManager {
        AlertManager::new(&config(), source, Arc::new(dispatcher)).unwrap()
    }

    fn cpu_rule() -> AlertRule {
        AlertRule::from_expression("HighCpu", "cpu_usage > 80", Severity::High).with_label("host", "web-1")
    }

    #[tokio::test]
    async fn test_loads_rules_from_config() {
        let manager = AlertManager::new(
            &AlertingConfig::default(),
            Arc::new(StaticMetricSource::new()),
            Arc::new(RecordingDispatcher::default()),
        )
        .unwrap();

        assert_eq!(manager.rules().len(), 4);
    }

    #[tokio::test]
    async fn test_idempotent_firing() {
        let source = Arc::new(StaticMetricSource::new());
        let dispatcher = RecordingDispatcher::default();
        let manager = manager(source.clone(), dispatcher.clone());
        manager.add_custom_rule(cpu_rule()).unwrap();
        source.set("cpu_usage", 95.0);

        for _ in 0..5 {
            manager.evaluate_all().await;
        }

        assert_eq!(manager.alert_history(100).len(), 1);
        assert_eq!(manager.active_alerts().len(), 1);
        assert_eq!(dispatcher.kinds(), vec![NotificationKind::AlertFired]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_and_purge() {
        let source = Arc::new(StaticMetricSource::new());
        let dispatcher = RecordingDispatcher::default();
        let manager = manager(source.clone(), dispatcher.clone());
        manager.add_custom_rule(cpu_rule()).unwrap();
        let fingerprint = cpu_rule().fingerprint();

        source.set("cpu_usage", 95.0);
        manager.evaluate_all().await;
        source.set("cpu_usage", 40.0);
        let summary = manager.evaluate_all().await;

        assert_eq!(summary.resolved, vec![fingerprint.clone()]);
        let alert = manager.get_alert(&fingerprint).unwrap();
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert!(alert.ends_at.is_some());
        assert!(manager.active_alerts().is_empty());
        assert_eq!(manager.alert_history(10), vec![alert]);

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        assert!(manager.get_alert(&fingerprint).is_some());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(manager.get_alert(&fingerprint).is_none());
        assert!(manager.alert_history(10).is_empty());
        assert_eq!(
            dispatcher.kinds(),
            vec![NotificationKind::AlertFired, NotificationKind::AlertResolved]
        );
    }

    #[tokio::test]
    async fn test_one_failing_rule_does_not_block_others() {
        let source = Arc::new(StaticMetricSource::new());
        let dispatcher = RecordingDispatcher::default();
        let manager = manager(source.clone(), dispatcher.clone());
        manager
            .add_custom_rule(AlertRule::from_expression("Missing", "not_reported > 1", Severity::Low))
            .unwrap();
        manager
            .add_custom_rule(AlertRule::from_expression("Broken", "cpu_usage is high", Severity::Low))
            .unwrap();
        manager.add_custom_rule(cpu_rule()).unwrap();
        source.set("cpu_usage", 95.0);

        let summary = manager.evaluate_all().await;

        assert_eq!(summary.rules_evaluated, 3);
        assert_eq!(summary.rules_errored, 1);
        assert_eq!(summary.fired, vec![cpu_rule().fingerprint()]);
        assert_eq!(manager.rules().len(), 3);
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_state() {
        let source = Arc::new(StaticMetricSource::new());
        let dispatcher = RecordingDispatcher::failing();
        let manager = manager(source.clone(), dispatcher.clone());
        manager.add_custom_rule(cpu_rule()).unwrap();
        source.set("cpu_usage", 95.0);

        manager.evaluate_all().await;

        assert_eq!(manager.active_alerts().len(), 1);
        assert_eq!(dispatcher.kinds(), vec![NotificationKind::AlertFired]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_reverts_after_duration() {
        let source = Arc::new(StaticMetricSource::new());
        let dispatcher = RecordingDispatcher::default();
        let manager = manager(source.clone(), dispatcher.clone());
        manager.add_custom_rule(cpu_rule()).unwrap();
        source.set("cpu_usage", 95.0);
        manager.evaluate_all().await;
        let alert = manager.active_alerts().remove(0);

        let silenced = manager
            .silence_alert(alert.id, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(silenced.status, AlertStatus::Silenced);
        assert!(manager.active_alerts().is_empty());

        // still firing underneath: no new alert, no notification
        manager.evaluate_all().await;
        assert_eq!(manager.alert_history(10).len(), 1);

        tokio::time::sleep(Duration::from_secs(601)).await;

        let active = manager.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, alert.id);
        assert_eq!(dispatcher.kinds(), vec![NotificationKind::AlertFired]);
    }

    #[tokio::test]
    async fn test_silence_unknown_alert() {
        let manager = manager(Arc::new(StaticMetricSource::new()), RecordingDispatcher::default());

        let err = manager
            .silence_alert(Uuid::new_v4(), Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_remove_rule_keeps_existing_alert() {
        let source = Arc::new(StaticMetricSource::new());
        let manager = manager(source.clone(), RecordingDispatcher::default());
        manager.add_custom_rule(cpu_rule()).unwrap();
        source.set("cpu_usage", 95.0);
        manager.evaluate_all().await;

        assert!(manager.remove_rule("HighCpu"));
        source.set("cpu_usage", 10.0);
        let summary = manager.evaluate_all().await;

        assert_eq!(summary.rules_evaluated, 0);
        assert_eq!(manager.active_alerts().len(), 1);
        assert!(!manager.remove_rule("HighCpu"));
    }

    #[tokio::test]
    async fn test_duplicate_rule_rejected() {
        let manager = manager(Arc::new(StaticMetricSource::new()), RecordingDispatcher::default());
        manager.add_custom_rule(cpu_rule()).unwrap();

        assert!(matches!(
            manager.add_custom_rule(cpu_rule()),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let manager = manager(Arc::new(StaticMetricSource::new()), RecordingDispatcher::default());

        manager.start().unwrap();
        assert!(manager.start().is_err());

        manager.stop();
        manager.start().unwrap();
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_firing_alert() {
        let source = Arc::new(StaticMetricSource::new());
        let dispatcher = RecordingDispatcher::default();
        let manager = manager(source.clone(), dispatcher.clone());
        manager.add_custom_rule(cpu_rule()).unwrap();
        source.set("cpu_usage", 95.0);
        manager.evaluate_all().await;

        source.remove("cpu_usage");
        let summary = manager.evaluate_all().await;

        assert_eq!(summary.rules_errored, 1);
        assert!(summary.resolved.is_empty());
        let alert = manager.get_alert(&cpu_rule().fingerprint()).unwrap();
        assert_eq!(alert.status, AlertStatus::Firing);
        assert_eq!(dispatcher.kinds(), vec![NotificationKind::AlertFired]);
    }

    #[tokio::test]
    async fn test_nan_sample_does_not_resolve() {
        let source = Arc::new(StaticMetricSource::new());
        let dispatcher = RecordingDispatcher::default();
        let manager = manager(source.clone(), dispatcher.clone());
        manager.add_custom_rule(cpu_rule()).unwrap();
        source.set("cpu_usage", 95.0);
        manager.evaluate_all().await;

        source.set("cpu_usage", f64::NAN);
        let summary = manager.evaluate_all().await;

        assert_eq!(summary.rules_errored, 1);
        assert_eq!(manager.active_alerts().len(), 1);
        assert_eq!(dispatcher.kinds(), vec![NotificationKind::AlertFired]);
    }

    #[test]
    fn test_silence_through_block_on() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let source = Arc::new(StaticMetricSource::new());
        let manager = manager(source.clone(), RecordingDispatcher::default());
        manager.add_custom_rule(cpu_rule()).unwrap();
        source.set("cpu_usage", 95.0);
        runtime.block_on(manager.evaluate_all());
        let alert = manager.active_alerts().remove(0);

        let silenced = runtime
            .block_on(manager.silence_alert(alert.id, Duration::from_secs(60)))
            .unwrap();

        assert_eq!(silenced.status, AlertStatus::Silenced);
        assert!(manager.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_removed_rule_forgets_pending_condition() {
        let source = Arc::new(StaticMetricSource::new());
        let clock = ManualClock::new(Utc::now());
        let manager = AlertManager::with_clock(
            &config(),
            source.clone(),
            Arc::new(RecordingDispatcher::default()),
            Arc::new(clock.clone()),
        )
        .unwrap();
        let rule = cpu_rule().with_for(Duration::from_secs(60));
        source.set("cpu_usage", 95.0);

        manager.add_custom_rule(rule.clone()).unwrap();
        manager.evaluate_all().await;
        assert!(manager.remove_rule("HighCpu"));

        clock.advance(chrono::Duration::seconds(120));
        manager.add_custom_rule(rule).unwrap();
        assert!(manager.evaluate_all().await.fired.is_empty());

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(manager.evaluate_all().await.fired.len(), 1);
    }
}
