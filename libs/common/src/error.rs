//! Error types for the shared infrastructure
//!
//! Database setup failures are typed so the service binary can tell a bad
//! configuration apart from an unreachable server.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Error type for database setup and probing
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The pool could not reach the server
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Configuration was rejected before connecting
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;
