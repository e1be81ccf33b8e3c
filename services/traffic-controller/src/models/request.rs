//! Inbound request and downstream agent payload

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Identity;

/// Channel a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// SMS/WhatsApp-style messaging, gated by admission control and PIN sessions
    Whatsapp,
    /// Authenticated chat widget, forwarded directly
    Webchat,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Webchat => "webchat",
        }
    }
}

/// Request accepted by the gateway on either channel
#[derive(Debug, Clone, Deserialize)]
pub struct InboundRequest {
    pub source: Source,
    pub phone: Option<String>,
    pub user_id: Option<String>,
    pub message: String,
    pub media_paths: Option<Vec<String>>,
    pub media_type: Option<String>,
    pub conversation_history: Option<Vec<Value>>,
    pub draft_listing_id: Option<String>,
    pub session_token: Option<String>,
    pub user_context: Option<Map<String, Value>>,
}

impl InboundRequest {
    /// Identity used for webchat traffic: user id, then phone, then a fixed tag
    pub fn webchat_identity(&self) -> String {
        [self.user_id.as_deref(), self.phone.as_deref()]
            .into_iter()
            .flatten()
            .find(|id| !id.trim().is_empty())
            .unwrap_or("webchat")
            .to_string()
    }
}

/// Request contract of the downstream agent service
#[derive(Debug, Clone, Serialize)]
pub struct AgentPayload {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub message: String,
    pub conversation_history: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_listing_id: Option<String>,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_context: Option<Map<String, Value>>,
}

impl AgentPayload {
    /// Webchat payload: the caller's identity and context pass through untouched
    pub fn for_webchat(request: InboundRequest) -> Self {
        let user_id = request.webchat_identity();
        Self {
            user_id,
            phone: request.phone,
            message: request.message,
            conversation_history: request.conversation_history.unwrap_or_default(),
            media_paths: request.media_paths,
            media_type: request.media_type,
            draft_listing_id: request.draft_listing_id,
            source: Source::Webchat,
            session_token: request.session_token,
            user_context: request.user_context,
        }
    }

    /// Messaging payload keyed on the resolved account, never the raw phone alone
    ///
    /// `user_context` starts from the profile's display name and is overlaid
    /// with whatever context the caller sent.
    pub fn for_messaging(
        request: InboundRequest,
        identity: &Identity,
        session_token: &str,
    ) -> Self {
        let mut user_context = Map::new();
        if let Some(name) = identity.preferred_name() {
            user_context.insert("display_name".to_string(), Value::String(name.to_string()));
        }
        if let Some(extra) = request.user_context {
            user_context.extend(extra);
        }

        Self {
            user_id: identity.id.to_string(),
            phone: Some(identity.phone.clone()),
            message: request.message,
            conversation_history: request.conversation_history.unwrap_or_default(),
            media_paths: request.media_paths,
            media_type: request.media_type,
            draft_listing_id: request.draft_listing_id,
            source: Source::Whatsapp,
            session_token: Some(session_token.to_string()),
            user_context: Some(user_context),
        }
    }
}
