//! Rate window state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-identity request counters
///
/// `minute_count` restarts at 1 once more than a minute has passed since
/// `last_request`. `hour_count` only ever grows; the whole record is evicted
/// by TTL, which makes the hourly bound approximate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindowState {
    pub minute_count: u32,
    pub hour_count: u32,
    pub last_request: DateTime<Utc>,
}

impl RateWindowState {
    /// State after the first request from an identity
    pub fn first(now: DateTime<Utc>) -> Self {
        Self {
            minute_count: 1,
            hour_count: 1,
            last_request: now,
        }
    }
}
