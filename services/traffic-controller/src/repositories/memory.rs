//! In-memory stores
//!
//! Mutex-guarded maps implementing every storage seam. They back tests and
//! single-instance deployments; nothing here is shared across processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AuditSink, CredentialStore, IdentityResolver, SessionStore, SessionStoreError};
use super::credential::verify_pin_hash;
use crate::models::{AuditRecord, EndReason, Identity, NewSession, Session};

/// Identities keyed by normalized phone
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityResolver {
    identities: Arc<Mutex<HashMap<String, Identity>>>,
}

impl MemoryIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, identity: Identity) {
        self.identities
            .lock()
            .await
            .insert(identity.phone.clone(), identity);
    }
}

#[async_trait]
impl IdentityResolver for MemoryIdentityResolver {
    async fn resolve(&self, phone: &str) -> Result<Option<Identity>> {
        Ok(self.identities.lock().await.get(phone).cloned())
    }
}

#[derive(Debug, Clone)]
struct StoredCredential {
    user_id: Uuid,
    pin_hash: String,
}

/// PIN hashes keyed by normalized phone
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    credentials: Arc<Mutex<HashMap<String, StoredCredential>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, phone: &str, user_id: Uuid, pin_hash: String) {
        self.credentials
            .lock()
            .await
            .insert(phone.to_string(), StoredCredential { user_id, pin_hash });
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn verify_pin(&self, phone: &str, pin: &str) -> Result<Option<Uuid>> {
        let credential = self.credentials.lock().await.get(phone).cloned();

        match credential {
            Some(credential) => {
                let matches = verify_pin_hash(&credential.pin_hash, pin)?;
                Ok(matches.then_some(credential.user_id))
            }
            None => Ok(None),
        }
    }
}

/// Single-slot session map: one current row per phone plus closed history
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<SessionSlots>>,
}

#[derive(Debug, Default)]
struct SessionSlots {
    current: HashMap<String, Session>,
    closed: Vec<Session>,
}

impl SessionSlots {
    fn find_mut(&mut self, session_id: Uuid) -> Option<&mut Session> {
        self.current
            .values_mut()
            .find(|session| session.id == session_id)
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every session ever created for a phone, oldest first
    pub async fn sessions_for(&self, phone: &str) -> Vec<Session> {
        let slots = self.inner.lock().await;
        slots
            .closed
            .iter()
            .chain(slots.current.get(phone))
            .filter(|session| session.phone == phone)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_active(&self, phone: &str) -> Result<Option<Session>> {
        let slots = self.inner.lock().await;
        Ok(slots
            .current
            .get(phone)
            .filter(|session| session.is_active)
            .cloned())
    }

    async fn create(&self, new_session: NewSession) -> Result<Session, SessionStoreError> {
        let mut slots = self.inner.lock().await;

        if let Some(existing) = slots.current.get(&new_session.phone) {
            if existing.is_active {
                return Err(SessionStoreError::Conflict(new_session.phone));
            }
        }

        let session = new_session.into_session();
        if let Some(previous) = slots.current.insert(session.phone.clone(), session.clone()) {
            slots.closed.push(previous);
        }
        Ok(session)
    }

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut slots = self.inner.lock().await;
        if let Some(session) = slots.find_mut(session_id).filter(|s| s.is_active) {
            session.last_activity = at;
        }
        Ok(())
    }

    async fn end(&self, session_id: Uuid, reason: EndReason, at: DateTime<Utc>) -> Result<bool> {
        let mut slots = self.inner.lock().await;
        match slots.find_mut(session_id).filter(|s| s.is_active) {
            Some(session) => {
                session.is_active = false;
                session.end_reason = Some(reason);
                session.ended_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut slots = self.inner.lock().await;
        let mut expired = 0;

        for session in slots.current.values_mut() {
            if session.is_active && session.is_expired(now) {
                session.is_active = false;
                session.end_reason = Some(EndReason::Timeout);
                session.ended_at = Some(now);
                expired += 1;
            }
        }

        Ok(expired)
    }
}

/// Audit records kept in memory; can be told to fail every write
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("audit store unavailable");
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_session(phone: &str, now: DateTime<Utc>) -> NewSession {
        NewSession::new(
            phone,
            Uuid::new_v4(),
            "token".to_string(),
            now,
            Duration::seconds(600),
        )
    }

    #[tokio::test]
    async fn test_create_is_compare_and_swap() {
        let store = MemorySessionStore::new();
        let now = Utc::now();

        let first = store.create(new_session("p", now)).await.unwrap();
        let second = store.create(new_session("p", now)).await;
        assert!(matches!(second, Err(SessionStoreError::Conflict(_))));

        store.end(first.id, EndReason::UserCancelled, now).await.unwrap();
        assert!(store.find_active("p").await.unwrap().is_none());

        let third = store.create(new_session("p", now)).await.unwrap();
        assert_ne!(first.id, third.id);

        let history = store.sessions_for("p").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].end_reason, Some(EndReason::UserCancelled));
        assert!(history[1].is_active);
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = store.create(new_session("p", now)).await.unwrap();

        assert!(store.end(session.id, EndReason::Timeout, now).await.unwrap());
        assert!(!store.end(session.id, EndReason::UserCancelled, now).await.unwrap());
        assert_eq!(
            store.sessions_for("p").await[0].end_reason,
            Some(EndReason::Timeout)
        );
    }

    #[tokio::test]
    async fn test_expire_stale_only_closes_old_sessions() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        store.create(new_session("old", now - Duration::seconds(700))).await.unwrap();
        store.create(new_session("fresh", now)).await.unwrap();

        assert_eq!(store.expire_stale(now).await.unwrap(), 1);
        assert!(store.find_active("old").await.unwrap().is_none());
        assert!(store.find_active("fresh").await.unwrap().is_some());
    }
}
