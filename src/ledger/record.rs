use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Usage accumulated by one device on one calendar day. Created lazily on
/// first access per day and kept forever (append-only history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUsageRecord {
    /// Calendar date in the server's reference time zone.
    pub date: NaiveDate,

    /// Episodes completed today. Never exceeds the configured daily limit.
    pub episodes_played: u32,

    /// Cumulative connected time in seconds.
    pub session_seconds: f64,

    /// Number of sessions today.
    pub sessions_count: u32,
}

impl DailyUsageRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            episodes_played: 0,
            session_seconds: 0.0,
            sessions_count: 0,
        }
    }
}
