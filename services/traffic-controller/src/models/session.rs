//! Messaging session model and related functionality

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a session stopped being active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Timeout,
    UserCancelled,
    OperationCompleted,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::UserCancelled => "user_cancelled",
            Self::OperationCompleted => "operation_completed",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "user_cancelled" => Ok(Self::UserCancelled),
            "operation_completed" => Ok(Self::OperationCompleted),
            other => Err(anyhow::anyhow!("Unknown session end reason: {}", other)),
        }
    }
}

/// Session entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub phone: String,
    pub user_id: Uuid,
    pub session_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub end_reason: Option<EndReason>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Computed from wall-clock age, regardless of what `is_active` says
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.expires_at - self.created_at
    }
}

/// New session creation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub phone: String,
    pub user_id: Uuid,
    pub session_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewSession {
    pub fn new(
        phone: &str,
        user_id: Uuid,
        session_token: String,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            phone: phone.to_string(),
            user_id,
            session_token,
            created_at: now,
            expires_at: now + duration,
        }
    }

    pub fn into_session(self) -> Session {
        Session {
            id: Uuid::new_v4(),
            phone: self.phone,
            user_id: self.user_id,
            session_token: self.session_token,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_activity: self.created_at,
            is_active: true,
            end_reason: None,
            ended_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_at(now: DateTime<Utc>) -> Session {
        NewSession::new(
            "+905321234567",
            Uuid::new_v4(),
            "token".to_string(),
            now,
            Duration::seconds(600),
        )
        .into_session()
    }

    #[test]
    fn test_expiry_is_computed_from_age() {
        let start = Utc::now();
        let session = session_at(start);

        assert!(session.is_active);
        assert_eq!(session.expires_at - session.created_at, Duration::seconds(600));
        assert!(!session.is_expired(start + Duration::seconds(599)));
        assert!(session.is_expired(start + Duration::seconds(600)));
        assert!(session.is_expired(start + Duration::seconds(601)));
    }

    #[test]
    fn test_end_reason_round_trips_through_text() {
        for reason in [
            EndReason::Timeout,
            EndReason::UserCancelled,
            EndReason::OperationCompleted,
        ] {
            assert_eq!(reason.as_str().parse::<EndReason>().unwrap(), reason);
        }
        assert!("expired".parse::<EndReason>().is_err());
    }
}
