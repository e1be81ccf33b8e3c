//! Identity resolution by phone number

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::models::Identity;

/// Maps a normalized phone number to a registered account
///
/// "Not found" is `Ok(None)`; `Err` is reserved for lookup failures.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, phone: &str) -> Result<Option<Identity>>;
}

/// Profile-backed identity repository
#[derive(Clone)]
pub struct IdentityRepository {
    pool: PgPool,
}

impl IdentityRepository {
    /// Create a new identity repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityResolver for IdentityRepository {
    async fn resolve(&self, phone: &str) -> Result<Option<Identity>> {
        debug!("Resolving identity for phone: {}", phone);

        let row = sqlx::query(
            r#"
            SELECT id, phone, display_name, full_name
            FROM profiles
            WHERE phone = $1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Identity {
            id: row.get("id"),
            phone: row.get("phone"),
            display_name: row.get("display_name"),
            full_name: row.get("full_name"),
        }))
    }
}
