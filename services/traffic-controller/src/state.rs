//! Application state shared across handlers

use common::cache::RedisPool;
use sqlx::PgPool;

use crate::dispatcher::Gateway;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    /// `None` when running on in-memory stores
    pub db_pool: Option<PgPool>,
    /// `None` when rate windows are kept in-process only
    pub redis_pool: Option<RedisPool>,
}

impl AppState {
    /// State without external backends
    pub fn in_memory(gateway: Gateway) -> Self {
        Self {
            gateway,
            db_pool: None,
            redis_pool: None,
        }
    }
}
