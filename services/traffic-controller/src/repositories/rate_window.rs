//! Redis-backed rate windows shared by every gateway instance

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use common::cache::RedisPool;
use redis::Script;

use crate::models::RateWindowState;
use crate::rate_limiter::{Admission, Exceeded, RatePolicy, RateWindowStore};

/// Read, evaluate and write back in one server-side step, so concurrent
/// requests for the same identity cannot both pass on the last free slot.
///
/// Returns `{allowed, exceeded_kind, count}` where kind 1 is the minute quota
/// and 2 the hour quota.
const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local minute_window = tonumber(ARGV[2])
local max_minute = tonumber(ARGV[3])
local max_hour = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])
local phone = ARGV[6]

local state = redis.call('HMGET', key, 'minute_count', 'hour_count', 'last_request')
if not state[1] then
  redis.call('HSET', key, 'minute_count', 1, 'hour_count', 1, 'last_request', now, 'phone', phone)
  redis.call('EXPIRE', key, ttl)
  return {1, 0, 0}
end

local minute_count = tonumber(state[1]) or 0
local hour_count = tonumber(state[2]) or 0
local last_request = tonumber(state[3]) or 0

local new_minute
if now - last_request > minute_window then
  new_minute = 1
elseif minute_count >= max_minute then
  return {0, 1, minute_count}
else
  new_minute = minute_count + 1
end

if hour_count >= max_hour then
  return {0, 2, hour_count}
end

redis.call('HSET', key, 'minute_count', new_minute, 'hour_count', hour_count + 1, 'last_request', now, 'phone', phone)
return {1, 0, 0}
"#;

/// Rate window store on Redis hashes `rate_limit:{phone}`
#[derive(Clone)]
pub struct RedisRateWindowStore {
    redis_pool: RedisPool,
    script: std::sync::Arc<Script>,
}

impl RedisRateWindowStore {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self {
            redis_pool,
            script: std::sync::Arc::new(Script::new(INCREMENT_SCRIPT)),
        }
    }

    fn key(identity: &str) -> String {
        format!("rate_limit:{}", identity)
    }
}

fn parse_state(fields: &HashMap<String, String>) -> Result<Option<RateWindowState>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let field = |name: &str| -> Result<i64> {
        fields
            .get(name)
            .with_context(|| format!("Rate window is missing {}", name))?
            .parse()
            .with_context(|| format!("Rate window field {} is not a number", name))
    };

    let last_request = Utc
        .timestamp_millis_opt(field("last_request")?)
        .single()
        .context("Rate window last_request is out of range")?;

    Ok(Some(RateWindowState {
        minute_count: u32::try_from(field("minute_count")?)?,
        hour_count: u32::try_from(field("hour_count")?)?,
        last_request,
    }))
}

#[async_trait]
impl RateWindowStore for RedisRateWindowStore {
    /// Expiry is enforced by the key TTL on the server
    async fn get(&self, identity: &str, _now: DateTime<Utc>) -> Result<Option<RateWindowState>> {
        let fields = self.redis_pool.hgetall(&Self::key(identity)).await?;
        parse_state(&fields)
    }

    async fn increment(
        &self,
        identity: &str,
        now: DateTime<Utc>,
        policy: &RatePolicy,
    ) -> Result<Admission> {
        let key = Self::key(identity);
        let args = [
            now.timestamp_millis().to_string(),
            policy.minute_window.num_milliseconds().to_string(),
            policy.max_requests_per_minute.to_string(),
            policy.max_requests_per_hour.to_string(),
            policy.hour_window.num_seconds().to_string(),
            identity.to_string(),
        ];

        let reply: Vec<i64> = self
            .redis_pool
            .run_script(&self.script, &[key.as_str()], &args)
            .await?;

        match reply.as_slice() {
            [1, ..] => Ok(Admission::Allowed),
            [0, 1, count] => Ok(Admission::denied(
                Exceeded::Minute(u32::try_from(*count)?),
                policy,
            )),
            [0, 2, count] => Ok(Admission::denied(
                Exceeded::Hour(u32::try_from(*count)?),
                policy,
            )),
            other => anyhow::bail!("Unexpected rate window script reply: {:?}", other),
        }
    }

    async fn reset(&self, identity: &str) -> Result<()> {
        self.redis_pool.delete(&Self::key(identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::cache::RedisConfig;

    #[test]
    fn test_parse_state_from_hash_fields() {
        let mut fields = HashMap::new();
        fields.insert("minute_count".to_string(), "4".to_string());
        fields.insert("hour_count".to_string(), "17".to_string());
        fields.insert("last_request".to_string(), "1735732800000".to_string());
        fields.insert("phone".to_string(), "+905321234567".to_string());

        let state = parse_state(&fields).unwrap().unwrap();
        assert_eq!(state.minute_count, 4);
        assert_eq!(state.hour_count, 17);
        assert_eq!(state.last_request.timestamp_millis(), 1_735_732_800_000);
    }

    #[test]
    fn test_parse_state_empty_and_corrupt() {
        assert!(parse_state(&HashMap::new()).unwrap().is_none());

        let mut fields = HashMap::new();
        fields.insert("minute_count".to_string(), "many".to_string());
        assert!(parse_state(&fields).is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis on localhost:6379"]
    async fn test_script_enforces_minute_quota() -> Result<()> {
        let pool = RedisPool::new(&RedisConfig::from_env()?).await?;
        let store = RedisRateWindowStore::new(pool);
        let policy = RatePolicy::default();
        let identity = "+900000000001";
        let start = Utc::now();

        store.reset(identity).await?;
        for i in 0..10 {
            let admission = store
                .increment(identity, start + Duration::seconds(i), &policy)
                .await?;
            assert!(admission.is_allowed());
        }
        let eleventh = store
            .increment(identity, start + Duration::seconds(10), &policy)
            .await?;
        assert!(!eleventh.is_allowed());

        let state = store.get(identity, Utc::now()).await?.expect("state stored");
        assert_eq!(state.minute_count, 10);

        store.reset(identity).await?;
        Ok(())
    }
}
