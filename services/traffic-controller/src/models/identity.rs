//! Identity model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A messaging-channel identity resolved to a registered account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Identity {
    /// Internal account id
    pub id: Uuid,
    /// Normalized phone number
    pub phone: String,
    pub display_name: Option<String>,
    pub full_name: Option<String>,
}

impl Identity {
    /// Name shown to the downstream agent, display name first
    pub fn preferred_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.full_name.as_deref())
    }
}
