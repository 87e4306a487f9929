//! Wires the alerting and capacity services together

use std::sync::Arc;

use tracing::info;

use crate::alerting::AlertManager;
use crate::capacity::CapacityPlanner;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, NotificationConfig};
use crate::dashboard::{Dashboard, DashboardBuilder};
use crate::error::Result;
use crate::notify::{FanoutDispatcher, LogDispatcher, NotificationDispatcher, WebhookDispatcher};
use crate::source::MetricSource;

/// Alert manager and capacity planner sharing one metric source and dispatcher
pub struct Monitor {
    alerts: AlertManager,
    capacity: CapacityPlanner,
}

impl Monitor {
    /// Build both services, delivering notifications as configured
    pub fn new(config: &Config, source: Arc<dyn MetricSource>) -> Result<Self> {
        let dispatcher = dispatcher_from_config(&config.notifications)?;
        Self::with_dispatcher(config, source, dispatcher)
    }

    /// Build both services with an explicit dispatcher
    pub fn with_dispatcher(
        config: &Config,
        source: Arc<dyn MetricSource>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Result<Self> {
        Self::with_clock(config, source, dispatcher, Arc::new(SystemClock))
    }

    /// Build both services with an explicit dispatcher and clock
    pub fn with_clock(
        config: &Config,
        source: Arc<dyn MetricSource>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let alerts = AlertManager::with_clock(&config.alerting, source.clone(), dispatcher.clone(), clock.clone())?;
        let capacity = CapacityPlanner::with_clock(&config.capacity, source, dispatcher, clock)?;

        Ok(Self { alerts, capacity })
    }

    /// The alert manager
    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    /// The capacity planner
    pub fn capacity(&self) -> &CapacityPlanner {
        &self.capacity
    }

    /// Start every periodic loop
    pub fn start(&self) -> Result<()> {
        self.alerts.start()?;
        if let Err(e) = self.capacity.start() {
            self.alerts.stop();
            return Err(e);
        }
        info!("Monitor started");
        Ok(())
    }

    /// Stop every periodic loop; running ticks are left to finish
    pub fn stop(&self) {
        self.alerts.stop();
        self.capacity.stop();
    }

    /// Stop and wait for running ticks to finish
    pub async fn shutdown(&self) {
        self.alerts.shutdown().await;
        self.capacity.shutdown().await;
        info!("Monitor shut down");
    }

    /// Dashboard covering the current rules and thresholds
    pub fn dashboard(&self) -> Dashboard {
        DashboardBuilder::new("vigil-overview", "Vigil overview")
            .description("Alert rule metrics and capacity headroom")
            .tag("vigil")
            .alert_rules(&self.alerts.rules())
            .capacity(&self.capacity.thresholds())
            .build()
    }
}

/// Log every notification, and post it to the webhook when one is configured
pub fn dispatcher_from_config(config: &NotificationConfig) -> Result<Arc<dyn NotificationDispatcher>> {
    let mut fanout = FanoutDispatcher::new().with(LogDispatcher);

    if let Some(url) = &config.webhook_url {
        fanout = fanout.with(WebhookDispatcher::new(url.clone(), config.webhook_timeout)?);
        info!(url = %url, "Webhook notifications enabled");
    }

    Ok(Arc::new(fanout))
}
