//! Bounded per-resource history

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::models::DataPoint;

/// Time series per resource, pruned to a sliding retention window
#[derive(Debug)]
pub struct HistoryStore {
    series: RwLock<HashMap<String, Vec<DataPoint>>>,
    retention: Duration,
}

impl HistoryStore {
    /// Create a store keeping `retention` worth of points
    pub fn new(retention: Duration) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Append a point and drop everything older than the retention window
    ///
    /// Points are kept in timestamp order even if appended out of order.
    pub fn append(&self, resource: &str, point: DataPoint, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        let mut series = self.series.write();
        let points = series.entry(resource.to_string()).or_default();

        let at = points.partition_point(|p| p.timestamp <= point.timestamp);
        points.insert(at, point);
        points.retain(|p| p.timestamp >= cutoff);
    }

    /// History of a resource, oldest first
    pub fn history(&self, resource: &str) -> Vec<DataPoint> {
        self.series.read().get(resource).cloned().unwrap_or_default()
    }

    /// Most recent point of a resource
    pub fn latest(&self, resource: &str) -> Option<DataPoint> {
        self.series.read().get(resource).and_then(|p| p.last().copied())
    }

    /// Drop a resource's history
    pub fn remove(&self, resource: &str) {
        self.series.write().remove(resource);
    }
}
