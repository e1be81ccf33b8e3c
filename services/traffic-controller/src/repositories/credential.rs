//! PIN credentials

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

/// Verifies a PIN for a phone number
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Verify the PIN and resolve the owning account in one step
    ///
    /// `Ok(None)` means no credential or a wrong PIN. A stored hash that cannot
    /// be parsed is an error, never a rejection.
    async fn verify_pin(&self, phone: &str, pin: &str) -> Result<Option<Uuid>>;
}

/// Hash a PIN into an Argon2 PHC string
///
/// Registration lives outside the gateway; this exists for provisioning and
/// tests, which pass cheaper parameters than production hashes use.
pub fn hash_pin_with(argon2: &Argon2<'_>, pin: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = argon2
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash PIN: {}", e))?
        .to_string();
    Ok(hash)
}

/// Check a PIN against a stored PHC string
///
/// Parameters are taken from the hash itself.
pub fn verify_pin_hash(stored_hash: &str, pin: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse PIN hash: {}", e))?;

    Ok(Argon2::default()
        .verify_password(pin.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Check a PIN on the blocking pool
///
/// Argon2 is CPU-bound. A panicked task surfaces as an error wrapping the
/// `JoinError`.
pub async fn verify_pin_blocking(stored_hash: String, pin: String) -> Result<bool> {
    run_blocking(move || verify_pin_hash(&stored_hash, &pin)).await
}

async fn run_blocking<F>(check: F) -> Result<bool>
where
    F: FnOnce() -> Result<bool> + Send + 'static,
{
    tokio::task::spawn_blocking(check)
        .await
        .context("PIN verification task failed")?
}

/// Credential repository over the `user_security` table
#[derive(Clone)]
pub struct CredentialRepository {
    pool: PgPool,
}

impl CredentialRepository {
    /// Create a new credential repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for CredentialRepository {
    async fn verify_pin(&self, phone: &str, pin: &str) -> Result<Option<Uuid>> {
        info!("Verifying PIN for phone: {}", phone);

        let row = sqlx::query(
            r#"
            SELECT user_id, pin_hash
            FROM user_security
            WHERE phone = $1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let user_id: Uuid = row.get("user_id");
        let pin_hash: String = row.get("pin_hash");
        let matches = verify_pin_blocking(pin_hash, pin.to_string()).await?;

        Ok(matches.then_some(user_id))
    }
}
