//! Data models for redirect analytics

use serde::Serialize;

/// One successful redirect resolution, waiting to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitEvent {
    pub link_id: i64,
    /// Kept for log context only
    pub short_code: String,
    pub queried_by: i64,
    /// Unix timestamp of the lookup, not of the write
    pub queried_at: i64,
}

/// Point-in-time counters of the analytics logger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalyticsStats {
    /// Events written to the store
    pub recorded: u64,
    /// Events given up after exhausting their attempts
    pub failed: u64,
    /// Events rejected because the queue was full or closed, or abandoned
    /// when shutdown ran out of time
    pub dropped: u64,
}
