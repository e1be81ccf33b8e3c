//! Gateway configuration
//!
//! Settings are read from `GATEWAY_`-prefixed environment variables through
//! the `config` crate. Every field has a default so a bare environment yields
//! a working single-instance gateway.

use anyhow::{Context, Result};
use chrono::Duration;
use config::{Config, Environment};
use serde::Deserialize;

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Socket address the HTTP server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Base URL of the downstream agent service
    #[serde(default = "default_agent_backend_url")]
    pub agent_backend_url: String,
    /// Timeout for a single forward call
    #[serde(default = "default_forward_timeout_secs")]
    pub forward_timeout_secs: u64,
    /// Fixed lifetime of a PIN-authenticated session
    #[serde(default = "default_session_duration_secs")]
    pub session_duration_secs: i64,
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,
    #[serde(default = "default_max_requests_per_hour")]
    pub max_requests_per_hour: u32,
    #[serde(default = "default_minute_window_secs")]
    pub minute_window_secs: i64,
    /// TTL of a rate window record; bounds the hour counter approximately
    #[serde(default = "default_hour_window_secs")]
    pub hour_window_secs: i64,
    /// Retry hint returned with every rate-limit rejection
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
    /// Words that end an active session when found in a message
    #[serde(default = "default_cancel_vocabulary")]
    pub cancel_vocabulary: Vec<String>,
    /// Intent fragments that mark a downstream operation as concluded
    #[serde(default = "default_completion_intents")]
    pub completion_intents: Vec<String>,
    /// Where unregistered users are sent to sign up
    #[serde(default = "default_registration_url")]
    pub registration_url: String,
    /// Cron schedule for the expired-session sweep; empty disables it
    #[serde(default = "default_session_sweep_schedule")]
    pub session_sweep_schedule: String,
    /// Apply the bundled schema migrations at startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_agent_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_forward_timeout_secs() -> u64 {
    30
}

fn default_session_duration_secs() -> i64 {
    600
}

fn default_max_requests_per_minute() -> u32 {
    10
}

fn default_max_requests_per_hour() -> u32 {
    100
}

fn default_minute_window_secs() -> i64 {
    60
}

fn default_hour_window_secs() -> i64 {
    3600
}

fn default_retry_after_secs() -> u64 {
    60
}

fn default_cancel_vocabulary() -> Vec<String> {
    ["iptal", "vazgeç", "kapat", "çık", "cancel", "stop"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_completion_intents() -> Vec<String> {
    ["completed", "published", "deleted"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_registration_url() -> String {
    "https://pazarglobal.com/auth/register".to_string()
}

fn default_session_sweep_schedule() -> String {
    "0 * * * * *".to_string()
}

fn default_run_migrations() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            agent_backend_url: default_agent_backend_url(),
            forward_timeout_secs: default_forward_timeout_secs(),
            session_duration_secs: default_session_duration_secs(),
            max_requests_per_minute: default_max_requests_per_minute(),
            max_requests_per_hour: default_max_requests_per_hour(),
            minute_window_secs: default_minute_window_secs(),
            hour_window_secs: default_hour_window_secs(),
            retry_after_secs: default_retry_after_secs(),
            cancel_vocabulary: default_cancel_vocabulary(),
            completion_intents: default_completion_intents(),
            registration_url: default_registration_url(),
            session_sweep_schedule: default_session_sweep_schedule(),
            run_migrations: default_run_migrations(),
        }
    }
}

impl GatewayConfig {
    /// Load the configuration from the environment
    ///
    /// # Environment Variables
    /// - `GATEWAY_BIND_ADDRESS`, `GATEWAY_AGENT_BACKEND_URL`, `GATEWAY_FORWARD_TIMEOUT_SECS`
    /// - `GATEWAY_SESSION_DURATION_SECS`, `GATEWAY_SESSION_SWEEP_SCHEDULE`
    /// - `GATEWAY_MAX_REQUESTS_PER_MINUTE`, `GATEWAY_MAX_REQUESTS_PER_HOUR`
    /// - `GATEWAY_MINUTE_WINDOW_SECS`, `GATEWAY_HOUR_WINDOW_SECS`, `GATEWAY_RETRY_AFTER_SECS`
    /// - `GATEWAY_CANCEL_VOCABULARY`, `GATEWAY_COMPLETION_INTENTS` (comma separated)
    /// - `GATEWAY_REGISTRATION_URL`, `GATEWAY_RUN_MIGRATIONS`
    pub fn from_env() -> Result<Self> {
        let config: GatewayConfig = Config::builder()
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cancel_vocabulary")
                    .with_list_parse_key("completion_intents"),
            )
            .build()
            .context("Failed to read gateway configuration")?
            .try_deserialize()
            .context("Invalid gateway configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.session_duration_secs <= 0 {
            anyhow::bail!("GATEWAY_SESSION_DURATION_SECS must be positive");
        }
        if self.minute_window_secs <= 0 || self.hour_window_secs < self.minute_window_secs {
            anyhow::bail!("rate windows must be positive and the hour window at least a minute");
        }
        if self.max_requests_per_minute == 0 || self.max_requests_per_hour == 0 {
            anyhow::bail!("rate limits must allow at least one request");
        }
        Ok(())
    }

    pub fn session_duration(&self) -> Duration {
        Duration::seconds(self.session_duration_secs)
    }

    pub fn forward_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.forward_timeout_secs)
    }
}
