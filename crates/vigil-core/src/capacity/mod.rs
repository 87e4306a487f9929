//! Capacity planning for Vigil
//!
//! Per-resource history, growth and exhaustion forecasts, and the report
//! that buckets recommendations by urgency.

pub mod forecast;
mod planner;
pub mod report;
mod store;

pub use planner::{CapacityPlanner, CollectionSummary};
pub use store::HistoryStore;
