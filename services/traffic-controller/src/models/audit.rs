//! Audit record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One forwarded messaging request and the downstream status it got
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub phone: String,
    pub source: String,
    pub message: String,
    pub response_status: u16,
    pub timestamp: DateTime<Utc>,
}
