//! Gateway-generated replies for the messaging channel
//!
//! Everything the gateway answers on its own, without the agent. Forwarded
//! answers are relayed by [`crate::forwarder::AgentResponse`].

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;

const PIN_PROMPT: &str = "Lütfen PIN kodunuzu girin. PIN'inizi hatırlamıyorsanız web sitesinden \
                          profil ayarlarınızdan yeni PIN oluşturabilirsiniz.";
const PIN_REJECTED: &str = "PIN hatalı. Lütfen tekrar deneyin.";
const SESSION_EXPIRED: &str = "Oturumunuzun süresi doldu. Devam etmek için lütfen PIN kodunuzu girin.";
const SESSION_CANCELLED: &str = "Oturumunuz kapatıldı. Yeniden başlamak için PIN kodunuzu girin.";

/// Appended to the agent's text when an operation closes the session
pub const COMPLETION_NOTICE: &str =
    "İşleminiz tamamlandı ve oturumunuz kapatıldı. Yeni bir işlem için PIN kodunuzu girin.";

/// A reply produced by the gateway itself
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayReply {
    RegistrationRequired { registration_url: String },
    RateLimited { reason: String, retry_after: u64 },
    PinRequired,
    PinRejected,
    PinAccepted {
        display_name: Option<String>,
        session_token: String,
        expires_at: DateTime<Utc>,
    },
    SessionExpired,
    SessionCancelled,
}

impl GatewayReply {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RegistrationRequired { .. } | Self::PinRejected => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PinRequired | Self::SessionExpired => StatusCode::FORBIDDEN,
            Self::PinAccepted { .. } | Self::SessionCancelled => StatusCode::OK,
        }
    }
}

fn registration_instructions(registration_url: &str) -> String {
    format!(
        "Bu telefon numarası kayıtlı değil.\n\n\
         Kayıt olmak için: {}\n\n\
         Kayıt olduktan sonra profil ayarlarından WhatsApp PIN'ini aktifleştirin.",
        registration_url
    )
}

fn welcome(display_name: Option<&str>) -> String {
    match display_name {
        Some(name) => format!(
            "Hoş geldiniz {}! PIN doğrulandı, oturumunuz açıldı. Size nasıl yardımcı olabilirim?",
            name
        ),
        None => "Hoş geldiniz! PIN doğrulandı, oturumunuz açıldı. Size nasıl yardımcı olabilirim?"
            .to_string(),
    }
}

impl IntoResponse for GatewayReply {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::RegistrationRequired { registration_url } => json!({
                "success": false,
                "step": "registration_required",
                "response": registration_instructions(&registration_url),
            }),
            Self::RateLimited {
                reason,
                retry_after,
            } => json!({
                "success": false,
                "error": reason,
                "retry_after": retry_after,
            }),
            Self::PinRequired => json!({
                "success": false,
                "require_pin": true,
                "response": PIN_PROMPT,
            }),
            Self::PinRejected => json!({
                "success": false,
                "require_pin": true,
                "response": PIN_REJECTED,
            }),
            Self::PinAccepted {
                display_name,
                session_token,
                expires_at,
            } => json!({
                "success": true,
                "response": welcome(display_name.as_deref()),
                "session_token": session_token,
                "expires_at": expires_at,
            }),
            Self::SessionExpired => json!({
                "success": false,
                "require_pin": true,
                "session_expired": true,
                "response": SESSION_EXPIRED,
            }),
            Self::SessionCancelled => json!({
                "success": true,
                "require_pin": true,
                "response": SESSION_CANCELLED,
            }),
        };

        (status, Json(body)).into_response()
    }
}
