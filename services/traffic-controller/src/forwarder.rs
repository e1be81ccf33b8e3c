//! Downstream agent client
//!
//! One outbound call per forwarded request, bounded by a timeout and never
//! retried. Whatever the agent answers is relayed with its status code.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use reqwest::{Client, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::models::AgentPayload;

/// Forwarding errors
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Agent did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Agent transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid agent endpoint {0}")]
    InvalidEndpoint(String),
}

/// The agent's answer, kept as raw bytes so it can be relayed unchanged
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl AgentResponse {
    /// Build a JSON response
    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self {
            status,
            content_type: Some(HeaderValue::from_static("application/json")),
            body: Bytes::from(value.to_string()),
        }
    }

    /// Body parsed as JSON, if it is JSON
    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Append a line to the `response` text of a JSON object body
    ///
    /// Returns `false` and leaves the body alone when it is not a JSON object.
    pub fn append_notice(&mut self, notice: &str) -> bool {
        let Some(Value::Object(mut body)) = self.body_json() else {
            return false;
        };

        let text = match body.get("response").and_then(Value::as_str) {
            Some(existing) if !existing.is_empty() => format!("{}\n\n{}", existing, notice),
            _ => notice.to_string(),
        };
        body.insert("response".to_string(), Value::String(text));

        self.body = Bytes::from(Value::Object(body).to_string());
        self.content_type = Some(HeaderValue::from_static("application/json"));
        true
    }
}

impl IntoResponse for AgentResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        match self.content_type {
            Some(content_type) => {
                response.headers_mut().insert(CONTENT_TYPE, content_type);
            }
            None => {
                response.headers_mut().remove(CONTENT_TYPE);
            }
        }
        response
    }
}

/// The downstream compute service
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn run(&self, payload: &AgentPayload) -> Result<AgentResponse, ForwardError>;
}

/// HTTP client for `{base}/agent/run`
#[derive(Clone)]
pub struct HttpAgentBackend {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpAgentBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ForwardError> {
        let endpoint = agent_endpoint(base_url)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn classify(&self, e: reqwest::Error) -> ForwardError {
        if e.is_timeout() {
            ForwardError::Timeout(self.timeout)
        } else {
            ForwardError::Transport(e)
        }
    }
}

fn agent_endpoint(base_url: &str) -> Result<Url, ForwardError> {
    let url = format!("{}/agent/run", base_url.trim_end_matches('/'));
    Url::parse(&url).map_err(|_| ForwardError::InvalidEndpoint(url))
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn run(&self, payload: &AgentPayload) -> Result<AgentResponse, ForwardError> {
        debug!("Forwarding {} request to {}", payload.source.as_str(), self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                let e = self.classify(e);
                error!("Failed to reach agent service: {}", e);
                e
            })?;

        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(|e| {
            let e = self.classify(e);
            error!("Failed to read agent response: {}", e);
            e
        })?;

        Ok(AgentResponse {
            status,
            content_type,
            body,
        })
    }
}
