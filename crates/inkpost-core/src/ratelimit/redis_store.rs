//! # Redis
//!
//! Shared counter store for multi-instance deployments.
//!
//! ## Implementation
//!
//! - One string key per (scope, identity), holding the count
//! - `INCR` then `PEXPIRE` on the first hit, in one Lua script, so the
//!   window start is the first request and the key vanishes when it closes
//! - Refunds `DECR` only while the key still exists, so a refund can never
//!   outlive its window

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    Client, Script,
};

use super::{CounterError, CounterStore, WindowHit};

const HIT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

const RELEASE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 and tonumber(redis.call('GET', KEYS[1])) > 0 then
    return redis.call('DECR', KEYS[1])
end
return 0
";

fn unavailable(e: redis::RedisError) -> CounterError {
    CounterError::Unavailable(e.to_string())
}

pub struct RedisCounterStore {
    connection: ConnectionManager,
    hit: Script,
    release: Script,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, CounterError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(timeout);

        let client = Client::open(redis_url).map_err(unavailable)?;
        let connection = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(unavailable)?;

        Ok(Self {
            connection,
            hit: Script::new(HIT_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        now: SystemTime,
    ) -> Result<WindowHit, CounterError> {
        let mut connection = self.connection.clone();
        let window_ms = window.as_millis().max(1) as u64;
        let (count, ttl_ms): (i64, i64) = self
            .hit
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut connection)
            .await
            .map_err(unavailable)?;

        Ok(WindowHit {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            reset_at: now + Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn release(&self, key: &str, _now: SystemTime) -> Result<(), CounterError> {
        let mut connection = self.connection.clone();
        let _: i64 = self
            .release
            .key(key)
            .invoke_async(&mut connection)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
