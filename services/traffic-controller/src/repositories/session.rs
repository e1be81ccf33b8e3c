//! Messaging session storage

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{EndReason, NewSession, Session};

/// Session store errors
#[derive(Error, Debug)]
pub enum SessionStoreError {
    /// Another active session already holds the slot for this phone
    #[error("An active session already exists for {0}")]
    Conflict(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// One active-session slot per phone number
///
/// `create` is a compare-and-swap: it only succeeds when the slot is empty.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The row marked active for this phone, if any; expiry is not checked here
    async fn find_active(&self, phone: &str) -> Result<Option<Session>>;

    async fn create(&self, new_session: NewSession) -> Result<Session, SessionStoreError>;

    /// Bump `last_activity` of an active session
    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Close an active session; `false` when it was already closed
    async fn end(&self, session_id: Uuid, reason: EndReason, at: DateTime<Utc>) -> Result<bool>;

    /// Close every active session whose fixed lifetime has passed
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Session repository over `whatsapp_sessions`
///
/// A partial unique index on `(phone) WHERE is_active` backs the single-slot
/// guarantee.
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    /// Create a new session repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: PgRow) -> Result<Session> {
    let end_reason: Option<String> = row.get("end_reason");

    Ok(Session {
        id: row.get("id"),
        phone: row.get("phone"),
        user_id: row.get("user_id"),
        session_token: row.get("session_token"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        last_activity: row.get("last_activity"),
        is_active: row.get("is_active"),
        end_reason: end_reason.map(|r| r.parse()).transpose()?,
        ended_at: row.get("ended_at"),
    })
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn find_active(&self, phone: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT id, phone, user_id, session_token, created_at, expires_at,
                   last_activity, is_active, end_reason, ended_at
            FROM whatsapp_sessions
            WHERE phone = $1 AND is_active
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn create(&self, new_session: NewSession) -> Result<Session, SessionStoreError> {
        info!("Creating session for phone: {}", new_session.phone);

        let phone = new_session.phone.clone();
        let session = new_session.into_session();

        let inserted = sqlx::query(
            r#"
            INSERT INTO whatsapp_sessions
                (id, phone, user_id, session_token, created_at, expires_at, last_activity, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
            ON CONFLICT (phone) WHERE is_active DO NOTHING
            RETURNING id
            "#,
        )
        .bind(session.id)
        .bind(&session.phone)
        .bind(session.user_id)
        .bind(&session.session_token)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.last_activity)
        .fetch_optional(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        match inserted {
            Some(_) => Ok(session),
            None => Err(SessionStoreError::Conflict(phone)),
        }
    }

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE whatsapp_sessions
            SET last_activity = $2
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn end(&self, session_id: Uuid, reason: EndReason, at: DateTime<Utc>) -> Result<bool> {
        info!("Ending session {} ({})", session_id, reason);

        let result = sqlx::query(
            r#"
            UPDATE whatsapp_sessions
            SET is_active = FALSE, end_reason = $2, ended_at = $3
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(session_id)
        .bind(reason.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE whatsapp_sessions
            SET is_active = FALSE, end_reason = $2, ended_at = $1
            WHERE is_active AND expires_at <= $1
            "#,
        )
        .bind(now)
        .bind(EndReason::Timeout.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
