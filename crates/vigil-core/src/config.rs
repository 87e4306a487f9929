//! Configuration management for Vigil
//!
//! Values are layered: built-in defaults, then an optional file (TOML, YAML or
//! JSON, by extension), then `VIGIL__`-prefixed environment variables, e.g.
//! `VIGIL__ALERTING__EVALUATION_INTERVAL=15s`.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{AlertRule, CapacityThreshold, Severity};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Alerting configuration
    pub alerting: AlertingConfig,

    /// Capacity planning configuration
    pub capacity: CapacityConfig,

    /// Notification configuration
    pub notifications: NotificationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("VIGIL")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("alerting.evaluation_interval", self.alerting.evaluation_interval),
            ("alerting.fetch_timeout", self.alerting.fetch_timeout),
            ("capacity.collection_interval", self.capacity.collection_interval),
            ("capacity.forecast_interval", self.capacity.forecast_interval),
            ("capacity.history_retention", self.capacity.history_retention),
            ("capacity.fetch_timeout", self.capacity.fetch_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }

        if self.capacity.forecast_horizon_days == 0 {
            return Err(Error::config("capacity.forecast_horizon_days must be at least 1"));
        }

        let mut names = HashSet::new();
        for rule in &self.alerting.rules {
            if !names.insert(rule.name.as_str()) {
                return Err(Error::config(format!("duplicate alert rule '{}'", rule.name)));
            }
        }

        let mut resources = HashSet::new();
        for threshold in &self.capacity.thresholds {
            if !resources.insert(threshold.resource.as_str()) {
                return Err(Error::config(format!(
                    "duplicate capacity resource '{}'",
                    threshold.resource
                )));
            }
            if threshold.critical <= 0.0 || threshold.warning >= threshold.critical {
                return Err(Error::config(format!(
                    "capacity resource '{}' needs 0 < warning < critical",
                    threshold.resource
                )));
            }
        }

        Ok(())
    }
}

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// How often every rule is evaluated
    #[serde(with = "humantime_serde")]
    pub evaluation_interval: Duration,

    /// How long a resolved alert stays visible before removal
    #[serde(with = "humantime_serde")]
    pub resolved_retention: Duration,

    /// Upper bound on a single metric fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Rules loaded at startup
    pub rules: Vec<AlertRuleConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(30),
            resolved_retention: Duration::from_secs(5 * 60),
            fetch_timeout: Duration::from_secs(10),
            rules: default_rules(),
        }
    }
}

/// An alert rule as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    /// Unique rule name
    pub name: String,

    /// Expression such as `cpu_usage > 80`
    pub expr: String,

    /// Minimum duration the condition must hold
    #[serde(default, rename = "for", with = "humantime_serde")]
    pub for_duration: Duration,

    /// Alert severity
    #[serde(default)]
    pub severity: Severity,

    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl AlertRuleConfig {
    fn new(name: &str, expr: &str, severity: Severity, summary: &str) -> Self {
        Self {
            name: name.to_string(),
            expr: expr.to_string(),
            for_duration: Duration::ZERO,
            severity,
            labels: BTreeMap::new(),
            annotations: BTreeMap::from([("summary".to_string(), summary.to_string())]),
        }
    }
}

impl From<&AlertRuleConfig> for AlertRule {
    fn from(config: &AlertRuleConfig) -> Self {
        let mut rule = AlertRule::from_expression(&config.name, &config.expr, config.severity)
            .with_for(config.for_duration);
        rule.labels = config.labels.clone();
        rule.annotations = config.annotations.clone();
        rule
    }
}

fn default_rules() -> Vec<AlertRuleConfig> {
    vec![
        AlertRuleConfig::new("HighCpuUsage", "cpu_usage > 80", Severity::High, "CPU usage is above 80%"),
        AlertRuleConfig::new(
            "HighMemoryUsage",
            "memory_usage > 85",
            Severity::High,
            "Memory usage is above 85%",
        ),
        AlertRuleConfig::new(
            "DiskSpaceLow",
            "disk_usage > 90",
            Severity::Critical,
            "Disk usage is above 90%",
        ),
        AlertRuleConfig::new(
            "HighErrorRate",
            "error_rate > 5",
            Severity::Critical,
            "More than 5% of requests are failing",
        ),
    ]
}

/// Capacity planning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// How often every resource is sampled
    #[serde(with = "humantime_serde")]
    pub collection_interval: Duration,

    /// How often forecasts are recomputed
    #[serde(with = "humantime_serde")]
    pub forecast_interval: Duration,

    /// How much history is kept per resource
    #[serde(with = "humantime_serde")]
    pub history_retention: Duration,

    /// Forecast horizon in days
    pub forecast_horizon_days: u32,

    /// Forecast breaches within this many days are notified
    pub near_term_days: u32,

    /// Minimum gap between repeated threshold notifications; unset repeats every tick
    #[serde(default, with = "humantime_serde")]
    pub threshold_cooldown: Option<Duration>,

    /// Upper bound on a single metric fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Resources tracked at startup
    pub thresholds: Vec<CapacityThreshold>,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(5 * 60),
            forecast_interval: Duration::from_secs(60 * 60),
            history_retention: Duration::from_secs(30 * 24 * 60 * 60),
            forecast_horizon_days: 30,
            near_term_days: 7,
            threshold_cooldown: None,
            fetch_timeout: Duration::from_secs(10),
            thresholds: default_thresholds(),
        }
    }
}

fn default_thresholds() -> Vec<CapacityThreshold> {
    vec![
        CapacityThreshold::new("cpu", "cpu_usage", 70.0, 90.0, "%"),
        CapacityThreshold::new("memory", "memory_usage", 75.0, 90.0, "%"),
        CapacityThreshold::new("disk", "disk_usage", 80.0, 95.0, "%"),
        CapacityThreshold::new("database_connections", "db_connections_active", 80.0, 95.0, "connections"),
    ]
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook receiving every notification, if any
    pub webhook_url: Option<String>,

    /// Webhook request timeout
    #[serde(with = "humantime_serde")]
    pub webhook_timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout: Duration::from_secs(30),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();

        config.validate().unwrap();
        assert_eq!(config.alerting.evaluation_interval, Duration::from_secs(30));
        assert_eq!(config.capacity.history_retention, Duration::from_secs(2_592_000));
        assert_eq!(config.capacity.threshold_cooldown, None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[alerting]
evaluation_interval = "15s"

[[alerting.rules]]
name = "QueueBacklog"
expr = "queue_depth >= 1000"
for = "2m"
severity = "critical"
labels = {{ team = "ingest" }}

[capacity]
threshold_cooldown = "30m"

[[capacity.thresholds]]
resource = "storage"
metric = "storage_used_gb"
warning = 800.0
critical = 1000.0
unit = "GB"
expected_daily_growth = 1.5

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.alerting.evaluation_interval, Duration::from_secs(15));
        assert_eq!(config.alerting.rules.len(), 1);
        let rule = AlertRule::from(&config.alerting.rules[0]);
        assert_eq!(rule.name, "QueueBacklog");
        assert_eq!(rule.expression(), "queue_depth >= 1000");
        assert_eq!(rule.for_duration, Duration::from_secs(120));
        assert_eq!(rule.severity, Severity::Critical);
        assert_eq!(rule.labels["team"], "ingest");
        assert_eq!(config.capacity.threshold_cooldown, Some(Duration::from_secs(1800)));
        assert_eq!(
            config.capacity.thresholds,
            vec![CapacityThreshold::new("storage", "storage_used_gb", 800.0, 1000.0, "GB")
                .with_expected_growth(1.5)]
        );
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_duplicate_rules() {
        let mut config = Config::default();
        config.alerting.rules.push(config.alerting.rules[0].clone());

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.capacity.thresholds = vec![CapacityThreshold::new("disk", "disk_usage", 95.0, 80.0, "%")];

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut config = Config::default();
        config.alerting.evaluation_interval = Duration::ZERO;

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
