//! Storage seams of the gateway
//!
//! Each store is a trait with a PostgreSQL or Redis implementation for
//! production and an in-memory one for tests and single-instance use.

pub mod audit;
pub mod credential;
pub mod identity;
pub mod memory;
pub mod rate_window;
pub mod session;

pub use audit::{AuditRepository, AuditSink};
pub use credential::{CredentialRepository, CredentialStore};
pub use identity::{IdentityRepository, IdentityResolver};
pub use rate_window::RedisRateWindowStore;
pub use session::{SessionRepository, SessionStore, SessionStoreError};
