//! Traffic controller models

pub mod audit;
pub mod identity;
pub mod rate_window;
pub mod request;
pub mod session;

// Re-export for convenience
pub use audit::AuditRecord;
pub use identity::Identity;
pub use rate_window::RateWindowState;
pub use request::{AgentPayload, InboundRequest, Source};
pub use session::{EndReason, NewSession, Session};
