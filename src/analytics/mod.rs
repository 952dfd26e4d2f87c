//! Redirect analytics
//!
//! Hit counting and the query log are advisory: they are written off the
//! redirect path and may lag behind, but every hit handed to the logger ends
//! up in exactly one of the recorded, failed or dropped counters.

pub mod logger;
pub mod models;

pub use logger::AnalyticsLogger;
pub use models::{AnalyticsStats, HitEvent};
