//! Alerting for Vigil
//!
//! Rule evaluation against a metric source, the firing/resolved/silenced
//! alert state machine, and notification of transitions.

mod evaluator;
mod manager;
mod repository;

pub use evaluator::{Evaluation, RuleEvaluator};
pub use manager::{AlertManager, EvaluationSummary};
pub use repository::{AlertStore, RuleStore, Transition};
