//! Traffic controller
//!
//! A gateway in front of the conversational agent service. Webchat requests
//! are forwarded directly; messaging requests go through per-phone admission
//! control and a PIN-authenticated session gate before anything reaches the
//! agent.

pub mod audit;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod forwarder;
pub mod models;
pub mod rate_limiter;
pub mod reply;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod state;
pub mod sweeper;
pub mod validation;

pub use dispatcher::{Backends, Gateway};
pub use state::AppState;
