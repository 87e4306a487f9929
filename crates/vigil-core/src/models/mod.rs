//! Data models for Vigil

mod alert;
mod capacity;

pub use alert::*;
pub use capacity::*;
