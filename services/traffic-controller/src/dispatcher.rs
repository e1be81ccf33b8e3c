//! Request dispatch for both channels
//!
//! Webchat goes straight to the agent. Messaging traffic passes admission
//! control, identity resolution and the PIN/session gate first, and only an
//! active session that was neither expired nor cancelled reaches the agent.

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use tracing::{error, info, warn};

use crate::{
    audit::AuditLogger,
    clock::Clock,
    config::GatewayConfig,
    error::{GatewayError, GatewayResult},
    forwarder::{AgentBackend, AgentResponse},
    models::{AgentPayload, AuditRecord, InboundRequest, Source},
    rate_limiter::{Admission, AdmissionController},
    reply::{COMPLETION_NOTICE, GatewayReply},
    repositories::{AuditSink, CredentialStore, IdentityResolver, SessionStore},
    session::{GateOutcome, SessionManager},
    validation::normalize_phone,
};

/// Storage backends the gateway is wired to
pub struct Backends {
    pub identities: Arc<dyn IdentityResolver>,
    pub credentials: Arc<dyn CredentialStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub audit: Arc<dyn AuditSink>,
}

/// The gateway in front of the agent service
#[derive(Clone)]
pub struct Gateway {
    admission: AdmissionController,
    identities: Arc<dyn IdentityResolver>,
    sessions: SessionManager,
    agent: Arc<dyn AgentBackend>,
    audit: AuditLogger,
    clock: Arc<dyn Clock>,
    registration_url: String,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        admission: AdmissionController,
        backends: Backends,
        agent: Arc<dyn AgentBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            admission,
            identities: backends.identities,
            sessions: SessionManager::new(backends.sessions, backends.credentials, config),
            agent,
            audit: AuditLogger::new(backends.audit),
            clock,
            registration_url: config.registration_url.clone(),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Route one inbound request by channel
    pub async fn dispatch(&self, request: InboundRequest) -> GatewayResult<Response> {
        match request.source {
            Source::Webchat => self.dispatch_webchat(request).await,
            Source::Whatsapp => self.dispatch_messaging(request).await,
        }
    }

    async fn dispatch_webchat(&self, request: InboundRequest) -> GatewayResult<Response> {
        info!("Webchat request from {}", request.webchat_identity());

        let payload = AgentPayload::for_webchat(request);
        let response = self.forward(&payload).await?;
        Ok(response.into_response())
    }

    async fn dispatch_messaging(&self, request: InboundRequest) -> GatewayResult<Response> {
        let phone = request
            .phone
            .as_deref()
            .map(normalize_phone)
            .filter(|phone| !phone.is_empty())
            .ok_or_else(|| GatewayError::BadRequest("Phone number required".to_string()))?;

        info!("Messaging request from {}", phone);
        let now = self.clock.now();

        if let Admission::Denied {
            reason,
            retry_after,
        } = self.admission.check(&phone, now).await
        {
            warn!("Rate limit exceeded for {}: {}", phone, reason);
            return Ok(GatewayReply::RateLimited {
                reason,
                retry_after,
            }
            .into_response());
        }

        let identity = self.identities.resolve(&phone).await.map_err(|e| {
            error!("Failed to resolve identity for {}: {}", phone, e);
            GatewayError::from_store(e)
        })?;

        let Some(identity) = identity else {
            warn!("Phone number not registered: {}", phone);
            return Ok(GatewayReply::RegistrationRequired {
                registration_url: self.registration_url.clone(),
            }
            .into_response());
        };

        let outcome = self
            .sessions
            .evaluate(&identity, &request.message, now)
            .await
            .map_err(|e| {
                error!("Session gate failed for {}: {}", phone, e);
                GatewayError::from_store(e)
            })?;

        let session = match outcome {
            GateOutcome::Proceed(session) => session,
            GateOutcome::PinAccepted(session) => {
                return Ok(GatewayReply::PinAccepted {
                    display_name: identity.preferred_name().map(str::to_string),
                    session_token: session.session_token,
                    expires_at: session.expires_at,
                }
                .into_response());
            }
            GateOutcome::PinRejected => return Ok(GatewayReply::PinRejected.into_response()),
            GateOutcome::PinRequired => return Ok(GatewayReply::PinRequired.into_response()),
            GateOutcome::Expired => return Ok(GatewayReply::SessionExpired.into_response()),
            GateOutcome::Cancelled => return Ok(GatewayReply::SessionCancelled.into_response()),
        };

        let message = request.message.clone();
        let payload = AgentPayload::for_messaging(request, &identity, &session.session_token);
        let mut response = self.forward(&payload).await?;
        let answered_at = self.clock.now();

        if let Err(e) = self.sessions.record_activity(&session, answered_at).await {
            warn!("Failed to record activity for session {}: {}", session.id, e);
        }

        let completed = response
            .body_json()
            .is_some_and(|body| self.sessions.is_completion(&body));
        if completed {
            match self.sessions.complete(&session, answered_at).await {
                Ok(()) => {
                    response.append_notice(COMPLETION_NOTICE);
                }
                Err(e) => warn!("Failed to close completed session {}: {}", session.id, e),
            }
        }

        self.audit.record(AuditRecord {
            phone: identity.phone.clone(),
            source: Source::Whatsapp.as_str().to_string(),
            message,
            response_status: response.status.as_u16(),
            timestamp: answered_at,
        });

        Ok(response.into_response())
    }

    async fn forward(&self, payload: &AgentPayload) -> GatewayResult<AgentResponse> {
        self.agent.run(payload).await.map_err(|e| {
            error!("Failed to forward {} request: {}", payload.source.as_str(), e);
            GatewayError::Unavailable
        })
    }
}
