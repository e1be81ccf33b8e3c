//! Audit log storage

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::AuditRecord;

/// Append-only destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// Audit repository over the `audit_logs` table
#[derive(Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    /// Create a new audit repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for AuditRepository {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (phone, source, message, response_status, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.phone)
        .bind(&record.source)
        .bind(&record.message)
        .bind(i32::from(record.response_status))
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
