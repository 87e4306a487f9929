//! # Vigil
//!
//! Alert evaluation and capacity forecasting engine.
//!
//! Vigil evaluates threshold rules against a metric source, tracks the alerts
//! they raise, and forecasts when tracked resources will run out of headroom.
//!
//! ## Architecture
//!
//! - **Alerting**: periodic rule evaluation and the firing/resolved/silenced alert lifecycle
//! - **Capacity**: per-resource history, growth-rate forecasts and risk reports
//! - **Sources**: where metric values come from (in-memory, Prometheus)
//! - **Notifications**: where events go (log, webhook, fanout)
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil::{source::PrometheusMetricSource, Config, Monitor};
//!
//! # async fn run() -> vigil::Result<()> {
//! let config = Config::load(None)?;
//! vigil::logging::init(&config.logging)?;
//!
//! let source = PrometheusMetricSource::new("http://localhost:9090", config.alerting.fetch_timeout)?;
//! let monitor = Monitor::new(&config, Arc::new(source))?;
//! monitor.start()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod capacity;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod schedule;
pub mod source;

pub use config::Config;
pub use error::{Error, Result};
pub use monitor::Monitor;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::AlertManager;
    pub use crate::capacity::CapacityPlanner;
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::monitor::Monitor;
    pub use crate::notify::{Notification, NotificationDispatcher, NotificationKind};
    pub use crate::source::{MetricError, MetricSource};
}
