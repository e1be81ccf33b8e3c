//! Shared harness for gateway integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

use traffic_controller::{
    AppState, Backends, Gateway,
    clock::ManualClock,
    config::GatewayConfig,
    forwarder::{AgentBackend, AgentResponse, ForwardError},
    models::{AgentPayload, Identity, Session},
    rate_limiter::{AdmissionController, RatePolicy},
    repositories::{
        credential::hash_pin_with,
        memory::{MemoryAuditSink, MemoryCredentialStore, MemoryIdentityResolver, MemorySessionStore},
    },
    routes::create_router,
};

pub const PHONE: &str = "+905321234567";
pub const PIN: &str = "1234";

#[derive(Clone)]
enum AgentMode {
    Reply(StatusCode, Value),
    Down,
    Crash,
}

/// Downstream agent double recording every payload it receives
#[derive(Clone)]
pub struct FakeAgent {
    calls: Arc<AtomicUsize>,
    payloads: Arc<Mutex<Vec<Value>>>,
    mode: Arc<Mutex<AgentMode>>,
}

impl FakeAgent {
    fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            payloads: Arc::new(Mutex::new(Vec::new())),
            mode: Arc::new(Mutex::new(AgentMode::Reply(
                StatusCode::OK,
                json!({"success": true, "response": "Tamam", "intent": "chat"}),
            ))),
        }
    }

    pub async fn reply_with(&self, status: StatusCode, body: Value) {
        *self.mode.lock().await = AgentMode::Reply(status, body);
    }

    pub async fn go_down(&self) {
        *self.mode.lock().await = AgentMode::Down;
    }

    pub async fn crash(&self) {
        *self.mode.lock().await = AgentMode::Crash;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn last_payload(&self) -> Option<Value> {
        self.payloads.lock().await.last().cloned()
    }
}

#[async_trait]
impl AgentBackend for FakeAgent {
    async fn run(&self, payload: &AgentPayload) -> Result<AgentResponse, ForwardError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads
            .lock()
            .await
            .push(serde_json::to_value(payload).unwrap());

        let mode = self.mode.lock().await.clone();
        match mode {
            AgentMode::Reply(status, body) => Ok(AgentResponse::json(status, &body)),
            AgentMode::Down => Err(ForwardError::Timeout(StdDuration::from_secs(30))),
            AgentMode::Crash => panic!("agent double crashed"),
        }
    }
}

pub struct Harness {
    pub router: Router,
    pub clock: Arc<ManualClock>,
    pub agent: FakeAgent,
    pub sessions: MemorySessionStore,
    pub audit: MemoryAuditSink,
    pub identity: Identity,
}

pub fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Gateway on in-memory stores with one registered identity whose PIN is `1234`
pub async fn harness() -> Harness {
    let config = GatewayConfig::default();

    let identity = Identity {
        id: Uuid::new_v4(),
        phone: PHONE.to_string(),
        display_name: Some("Ayşe".to_string()),
        full_name: Some("Ayşe Yılmaz".to_string()),
    };

    let identities = MemoryIdentityResolver::new();
    identities.insert(identity.clone()).await;

    let argon2 = Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        Params::new(1024, 1, 1, None).unwrap(),
    );
    let credentials = MemoryCredentialStore::new();
    credentials
        .insert(PHONE, identity.id, hash_pin_with(&argon2, PIN).unwrap())
        .await;

    let sessions = MemorySessionStore::new();
    let audit = MemoryAuditSink::new();
    let agent = FakeAgent::new();
    let clock = Arc::new(ManualClock::new(start()));

    let gateway = Gateway::new(
        &config,
        AdmissionController::local(RatePolicy::from(&config)),
        Backends {
            identities: Arc::new(identities),
            credentials: Arc::new(credentials),
            sessions: Arc::new(sessions.clone()),
            audit: Arc::new(audit.clone()),
        },
        Arc::new(agent.clone()),
        clock.clone(),
    );

    Harness {
        router: create_router(AppState::in_memory(gateway)),
        clock,
        agent,
        sessions,
        audit,
        identity,
    }
}

impl Harness {
    pub async fn send(&self, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn post(&self, body: Value) -> (StatusCode, Value) {
        self.send(body.to_string()).await
    }

    /// A messaging-channel message from the registered phone
    pub async fn message(&self, text: &str) -> (StatusCode, Value) {
        self.post(json!({"source": "whatsapp", "phone": PHONE, "message": text}))
            .await
    }

    /// Open a session with the correct PIN
    pub async fn login(&self) -> Session {
        let (status, body) = self.message(PIN).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        self.active_session().await.expect("session after login")
    }

    pub async fn active_session(&self) -> Option<Session> {
        self.sessions
            .sessions_for(PHONE)
            .await
            .into_iter()
            .find(|session| session.is_active)
    }

    pub fn advance(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }

    /// Wait for spawned audit writes to land
    pub async fn audit_count(&self, expected: usize) -> usize {
        for _ in 0..50 {
            let count = self.audit.records().await.len();
            if count >= expected {
                return count;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        self.audit.records().await.len()
    }
}
