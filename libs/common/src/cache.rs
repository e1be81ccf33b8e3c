//! Redis cache module for the traffic controller
//!
//! This module provides functionality for connecting to Redis and performing
//! the cache operations the gateway needs: hash reads, deletes and
//! server-side scripts for atomic read-modify-write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use redis::{AsyncCommands, Client, FromRedisValue, Script, aio::ConnectionManager};
use tokio::sync::OnceCell;
use tracing::info;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Upper bound for a single round trip, connection included
    pub command_timeout: Duration,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    /// - `REDIS_COMMAND_TIMEOUT_MS`: Per-command timeout in milliseconds (default: 500)
    pub fn from_env() -> Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let command_timeout_ms = std::env::var("REDIS_COMMAND_TIMEOUT_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .unwrap_or(500);

        Ok(RedisConfig {
            url,
            command_timeout: Duration::from_millis(command_timeout_ms),
        })
    }
}

/// Shared Redis connection
///
/// Every clone multiplexes commands over one `ConnectionManager`, which
/// reconnects on its own after the server drops it.
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    command_timeout: Duration,
}

impl RedisPool {
    /// Initialize a new Redis pool
    ///
    /// The connection is opened on first use, so an unreachable server
    /// surfaces on the first command rather than at startup.
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool {
            client,
            connection: Arc::new(OnceCell::new()),
            command_timeout: config.command_timeout,
        })
    }

    /// Handle to the shared connection, connecting on first call
    async fn get_connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }

    /// Bound a Redis round trip by the configured command timeout
    async fn bounded<T, F>(&self, op: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.command_timeout, op)
            .await
            .context("Redis command timed out")?
    }

    /// Read every field of a hash; an absent key yields an empty map
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.bounded(async {
            let mut conn = self.get_connection().await?;
            let fields: HashMap<String, String> = conn.hgetall(key).await?;
            Ok(fields)
        })
        .await
    }

    /// Run a Lua script atomically against the given keys
    pub async fn run_script<T: FromRedisValue>(
        &self,
        script: &Script,
        keys: &[&str],
        args: &[String],
    ) -> Result<T> {
        self.bounded(async {
            let mut conn = self.get_connection().await?;
            let mut invocation = script.prepare_invoke();
            for key in keys {
                invocation.key(*key);
            }
            for arg in args {
                invocation.arg(arg.as_str());
            }
            let value: T = invocation.invoke_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    /// Delete a key from Redis
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.bounded(async {
            let mut conn = self.get_connection().await?;
            let _: u64 = conn.del(key).await?;
            Ok(())
        })
        .await
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        self.bounded(async {
            let mut conn = self.get_connection().await?;
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(pong == "PONG")
        })
        .await
    }

    /// Whether the shared connection has been established
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }
}
