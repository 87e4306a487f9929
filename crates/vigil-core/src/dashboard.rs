//! Dashboard export
//!
//! Builds a Grafana-style dashboard definition from alert rules and capacity
//! thresholds. Vigil only produces these; it never reads them back.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{AlertRule, CapacityThreshold};

const PANEL_WIDTH: u32 = 12;
const PANEL_HEIGHT: u32 = 8;
const GRID_COLUMNS: u32 = 24;

/// A dashboard definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    /// Stable identifier
    pub uid: String,
    /// Display title
    pub title: String,
    /// Description
    pub description: String,
    /// Tags
    pub tags: Vec<String>,
    /// Panels, laid out left to right, top to bottom
    pub panels: Vec<Panel>,
}

impl Dashboard {
    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A single visualization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    /// Panel id, unique within the dashboard
    pub id: u32,
    /// Display title
    pub title: String,
    /// Visualization type
    #[serde(rename = "type")]
    pub kind: String,
    /// Position on the grid
    pub grid_pos: GridPos,
    /// Queries
    pub targets: Vec<Target>,
}

/// Panel position and size in grid units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPos {
    /// Column
    pub x: u32,
    /// Row
    pub y: u32,
    /// Width
    pub w: u32,
    /// Height
    pub h: u32,
}

/// A panel query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Query expression
    pub expr: String,
    /// Reference id within the panel
    pub ref_id: String,
    /// Series legend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legend_format: Option<String>,
}

/// Builds a [`Dashboard`] one panel at a time
#[derive(Debug, Clone)]
pub struct DashboardBuilder {
    dashboard: Dashboard,
}

impl DashboardBuilder {
    /// Start an empty dashboard
    pub fn new(uid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            dashboard: Dashboard {
                uid: uid.into(),
                title: title.into(),
                description: String::new(),
                tags: Vec::new(),
                panels: Vec::new(),
            },
        }
    }

    /// Set the description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.dashboard.description = description.into();
        self
    }

    /// Add a tag
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.dashboard.tags.push(tag.into());
        self
    }

    /// One time series panel per distinct metric watched by `rules`
    ///
    /// Each rule on the metric adds its threshold as a constant series.
    #[must_use]
    pub fn alert_rules(mut self, rules: &[AlertRule]) -> Self {
        let metrics: BTreeSet<&str> = rules
            .iter()
            .filter_map(|r| r.predicate().map(|p| p.metric.as_str()))
            .collect();

        for metric in metrics {
            let mut targets = vec![target(metric, 0, Some(metric.to_string()))];
            for rule in rules {
                let Some(predicate) = rule.predicate() else {
                    continue;
                };
                if predicate.metric == metric {
                    let index = targets.len();
                    targets.push(target(&predicate.threshold.to_string(), index, Some(rule.name.clone())));
                }
            }
            self.push(metric.to_string(), "timeseries", targets);
        }
        self
    }

    /// One gauge panel per capacity threshold
    #[must_use]
    pub fn capacity(mut self, thresholds: &[CapacityThreshold]) -> Self {
        for threshold in thresholds {
            let targets = vec![target(&threshold.metric, 0, Some(threshold.resource.clone()))];
            self.push(format!("{} capacity", threshold.resource), "gauge", targets);
        }
        self
    }

    /// Finish
    pub fn build(self) -> Dashboard {
        self.dashboard
    }

    fn push(&mut self, title: String, kind: &str, targets: Vec<Target>) {
        let index = u32::try_from(self.dashboard.panels.len()).unwrap_or(u32::MAX);
        let per_row = GRID_COLUMNS / PANEL_WIDTH;

        self.dashboard.panels.push(Panel {
            id: index.saturating_add(1),
            title,
            kind: kind.to_string(),
            grid_pos: GridPos {
                x: (index % per_row) * PANEL_WIDTH,
                y: (index / per_row) * PANEL_HEIGHT,
                w: PANEL_WIDTH,
                h: PANEL_HEIGHT,
            },
            targets,
        });
    }
}

fn target(expr: &str, index: usize, legend: Option<String>) -> Target {
    let ref_id = u8::try_from(index)
        .ok()
        .filter(|i| *i < 26)
        .map_or_else(|| format!("Q{index}"), |i| char::from(b'A' + i).to_string());

    Target {
        expr: expr.to_string(),
        ref_id,
        legend_format: legend,
    }
}
