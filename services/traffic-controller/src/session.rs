//! PIN authentication and the messaging session state machine
//!
//! ```text
//! NO_SESSION --PIN accepted--> ACTIVE --timeout | cancel | completed--> NO_SESSION
//! NO_SESSION --PIN rejected--> NO_SESSION
//! ```
//!
//! Expiry is decided from the session's age at read time, so a row that is
//! still flagged active in storage is closed here the moment it is seen past
//! its lifetime.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    config::GatewayConfig,
    models::{EndReason, Identity, NewSession, Session},
    repositories::{CredentialStore, SessionStore, SessionStoreError},
    validation::{has_cancel_intent, is_pin_attempt},
};

const SESSION_TOKEN_LENGTH: usize = 48;

/// What the gateway should do with an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// PIN verified and a session opened; nothing is forwarded this turn
    PinAccepted(Session),
    PinRejected,
    /// No session and the message is not a PIN attempt
    PinRequired,
    /// The active session outlived its duration and was closed
    Expired,
    /// The user asked to end the session and it was closed
    Cancelled,
    /// Active session; forward the message
    Proceed(Session),
}

/// Session manager driving the PIN gate and session lifecycle
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialStore>,
    session_duration: Duration,
    cancel_vocabulary: Arc<Vec<String>>,
    completion_intents: Arc<Vec<String>>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialStore>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            sessions,
            credentials,
            session_duration: config.session_duration(),
            cancel_vocabulary: Arc::new(config.cancel_vocabulary.clone()),
            completion_intents: Arc::new(
                config
                    .completion_intents
                    .iter()
                    .map(|intent| intent.to_lowercase())
                    .collect(),
            ),
        }
    }

    pub fn session_duration(&self) -> Duration {
        self.session_duration
    }

    /// Run one inbound message through the state machine
    pub async fn evaluate(
        &self,
        identity: &Identity,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<GateOutcome> {
        let Some(session) = self.sessions.find_active(&identity.phone).await? else {
            if is_pin_attempt(message) {
                return self.authenticate(identity, message.trim(), now).await;
            }
            info!("PIN verification required for phone: {}", identity.phone);
            return Ok(GateOutcome::PinRequired);
        };

        if session.is_expired(now) {
            self.close(&session, EndReason::Timeout, now).await?;
            return Ok(GateOutcome::Expired);
        }

        if has_cancel_intent(message, &self.cancel_vocabulary) {
            self.close(&session, EndReason::UserCancelled, now).await?;
            return Ok(GateOutcome::Cancelled);
        }

        Ok(GateOutcome::Proceed(session))
    }

    /// Verify a PIN and open a session on success
    async fn authenticate(
        &self,
        identity: &Identity,
        pin: &str,
        now: DateTime<Utc>,
    ) -> Result<GateOutcome> {
        let verified = self.credentials.verify_pin(&identity.phone, pin).await?;

        let user_id = match verified {
            Some(user_id) if user_id == identity.id => user_id,
            Some(user_id) => {
                warn!(
                    "PIN credential for {} belongs to account {}, profile is {}",
                    identity.phone, user_id, identity.id
                );
                return Ok(GateOutcome::PinRejected);
            }
            None => {
                info!("PIN rejected for phone: {}", identity.phone);
                return Ok(GateOutcome::PinRejected);
            }
        };

        let new_session = NewSession::new(
            &identity.phone,
            user_id,
            generate_session_token(),
            now,
            self.session_duration,
        );

        match self.sessions.create(new_session.clone()).await {
            Ok(session) => {
                info!(
                    "Session {} created for phone {} until {}",
                    session.id, session.phone, session.expires_at
                );
                Ok(GateOutcome::PinAccepted(session))
            }
            Err(SessionStoreError::Conflict(_)) => self.resolve_conflict(new_session, now).await,
            Err(SessionStoreError::Backend(e)) => Err(e),
        }
    }

    /// Another request opened a session first
    ///
    /// A live winner is shared with this caller, who proved the same PIN. A
    /// stale winner is closed and creation retried once.
    async fn resolve_conflict(
        &self,
        new_session: NewSession,
        now: DateTime<Utc>,
    ) -> Result<GateOutcome> {
        let Some(existing) = self.sessions.find_active(&new_session.phone).await? else {
            return match self.sessions.create(new_session).await {
                Ok(session) => Ok(GateOutcome::PinAccepted(session)),
                Err(e) => Err(anyhow::anyhow!("Session creation failed after conflict: {}", e)),
            };
        };

        if !existing.is_expired(now) {
            info!(
                "Concurrent PIN success for {}, reusing session {}",
                existing.phone, existing.id
            );
            return Ok(GateOutcome::PinAccepted(existing));
        }

        self.close(&existing, EndReason::Timeout, now).await?;
        match self.sessions.create(new_session).await {
            Ok(session) => Ok(GateOutcome::PinAccepted(session)),
            Err(e) => Err(anyhow::anyhow!("Session creation failed after conflict: {}", e)),
        }
    }

    async fn close(&self, session: &Session, reason: EndReason, now: DateTime<Utc>) -> Result<()> {
        if self.sessions.end(session.id, reason, now).await? {
            info!(
                "Session {} for phone {} ended: {}",
                session.id, session.phone, reason
            );
        }
        Ok(())
    }

    /// Bump `last_activity` after a forwarded message
    pub async fn record_activity(&self, session: &Session, now: DateTime<Utc>) -> Result<()> {
        self.sessions.touch(session.id, now).await
    }

    /// Whether a downstream reply signals that the user's operation concluded
    ///
    /// Requires `success: true` and an `intent` containing one of the
    /// configured completion fragments.
    pub fn is_completion(&self, reply: &Value) -> bool {
        let succeeded = reply.get("success").and_then(Value::as_bool) == Some(true);
        let Some(intent) = reply.get("intent").and_then(Value::as_str) else {
            return false;
        };

        let intent = intent.to_lowercase();
        succeeded
            && self
                .completion_intents
                .iter()
                .any(|fragment| !fragment.is_empty() && intent.contains(fragment.as_str()))
    }

    /// Close a session whose operation completed
    pub async fn complete(&self, session: &Session, now: DateTime<Utc>) -> Result<()> {
        self.close(session, EndReason::OperationCompleted, now).await
    }

    /// Close every session past its lifetime
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let expired = self.sessions.expire_stale(now).await?;
        if expired > 0 {
            info!("Closed {} expired sessions", expired);
        }
        Ok(expired)
    }
}

/// Opaque random session token
pub fn generate_session_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
