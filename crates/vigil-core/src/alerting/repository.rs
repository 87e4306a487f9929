//! In-memory stores for alert rules and live alerts

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Alert, AlertRule, AlertStatus};

use super::evaluator::Evaluation;

/// Rules in rotation, unique by name
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: RwLock<Vec<AlertRule>>,
}

impl RuleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule; names must be unique
    pub fn add(&self, rule: AlertRule) -> Result<()> {
        let mut rules = self.rules.write();

        if rules.iter().any(|r| r.name == rule.name) {
            return Err(Error::validation(format!(
                "rule with name '{}' already exists",
                rule.name
            )));
        }

        rules.push(rule);
        Ok(())
    }

    /// Remove a rule by name, returning it if it existed
    pub fn remove(&self, name: &str) -> Option<AlertRule> {
        let mut rules = self.rules.write();
        let index = rules.iter().position(|r| r.name == name)?;
        Some(rules.remove(index))
    }

    /// Snapshot of all rules
    pub fn list(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

/// What applying an evaluation did to the alert table
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A new alert started firing
    Fired(Alert),
    /// A firing alert resolved
    Resolved(Alert),
    /// The condition holds but not yet for the rule's minimum duration
    Pending,
    /// Nothing changed
    Unchanged,
}

#[derive(Debug, Default)]
struct AlertTable {
    /// Live alerts by fingerprint
    alerts: HashMap<String, Alert>,
    /// Fingerprint -> when the condition was first seen true
    pending_since: HashMap<String, DateTime<Utc>>,
}

/// Live alerts keyed by fingerprint
///
/// Holds at most one alert per fingerprint. All transitions happen under a
/// single lock so concurrent ticks cannot interleave a check and an insert.
#[derive(Debug, Default)]
pub struct AlertStore {
    table: RwLock<AlertTable>,
}

impl AlertStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one evaluation of `rule` at time `now`
    pub fn apply(&self, rule: &AlertRule, evaluation: &Evaluation, now: DateTime<Utc>) -> Transition {
        let fingerprint = rule.fingerprint();
        let mut table = self.table.write();

        if !evaluation.firing {
            table.pending_since.remove(&fingerprint);

            return match table.alerts.get_mut(&fingerprint) {
                Some(alert) if alert.is_firing() => {
                    alert.resolve(now);
                    Transition::Resolved(alert.clone())
                }
                _ => Transition::Unchanged,
            };
        }

        if table.alerts.contains_key(&fingerprint) {
            return Transition::Unchanged;
        }

        if !rule.for_duration.is_zero() {
            let since = *table.pending_since.entry(fingerprint.clone()).or_insert(now);
            let held_long_enough = (now - since)
                .to_std()
                .map_or(false, |held| held >= rule.for_duration);

            if !held_long_enough {
                return Transition::Pending;
            }
            table.pending_since.remove(&fingerprint);
        }

        let alert = Alert::firing(rule, evaluation.value, evaluation.threshold, now);
        table.alerts.insert(fingerprint, alert.clone());
        Transition::Fired(alert)
    }

    /// Forget a pending condition, returning whether one was recorded
    pub fn clear_pending(&self, fingerprint: &str) -> bool {
        self.table.write().pending_since.remove(fingerprint).is_some()
    }

    /// Remove a resolved alert, unless it has been replaced since
    pub fn purge_resolved(&self, fingerprint: &str, id: Uuid) -> bool {
        let mut table = self.table.write();

        let matches = table
            .alerts
            .get(fingerprint)
            .is_some_and(|a| a.id == id && a.status == AlertStatus::Resolved);

        if matches {
            table.alerts.remove(fingerprint);
        }
        matches
    }

    /// Silence a firing alert until `until`
    pub fn silence(&self, id: Uuid, until: DateTime<Utc>) -> Result<Alert> {
        let mut table = self.table.write();

        let alert = table
            .alerts
            .values_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::not_found("alert", id.to_string()))?;

        if alert.status == AlertStatus::Resolved {
            return Err(Error::validation(format!("alert {id} is resolved")));
        }

        alert.status = AlertStatus::Silenced;
        alert.silenced_until = Some(until);
        Ok(alert.clone())
    }

    /// Revert a silence set to lapse at `until` back to firing
    ///
    /// Does nothing if the alert is gone, no longer silenced, or was
    /// silenced again with a different deadline.
    pub fn unsilence(&self, id: Uuid, until: DateTime<Utc>) -> Option<Alert> {
        let mut table = self.table.write();

        let alert = table.alerts.values_mut().find(|a| a.id == id)?;
        if alert.status != AlertStatus::Silenced || alert.silenced_until != Some(until) {
            return None;
        }

        alert.status = AlertStatus::Firing;
        alert.silenced_until = None;
        Some(alert.clone())
    }

    /// Alert by fingerprint
    pub fn get(&self, fingerprint: &str) -> Option<Alert> {
        self.table.read().alerts.get(fingerprint).cloned()
    }

    /// All firing alerts, ordered by start time then fingerprint
    pub fn firing(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .table
            .read()
            .alerts
            .values()
            .filter(|a| a.is_firing())
            .cloned()
            .collect();

        alerts.sort_by(|a, b| {
            a.starts_at
                .cmp(&b.starts_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        alerts
    }

    /// All tracked alerts, newest first, at most `limit`
    pub fn history(&self, limit: usize) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.table.read().alerts.values().cloned().collect();

        alerts.sort_by(|a, b| {
            b.starts_at
                .cmp(&a.starts_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        alerts.truncate(limit);
        alerts
    }

    /// Number of tracked alerts
    pub fn len(&self) -> usize {
        self.table.read().alerts.len()
    }

    /// Whether no alerts are tracked
    pub fn is_empty(&self) -> bool {
        self.table.read().alerts.is_empty()
    }
}
