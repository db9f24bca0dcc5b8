use crate::storage::{Claim, CooldownStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use r2d2_redis::redis;
use r2d2_redis::redis::Commands;
use std::time::Duration;

// deletes the key only while it still holds the caller's claim
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

pub type RedisPool = r2d2_redis::r2d2::Pool<r2d2_redis::RedisConnectionManager>;

/// Builds the pool lazily so a Redis outage at boot degrades scans and sweeps instead of aborting.
pub fn connect(redis_uri: &str, connection_timeout_ms: u64) -> Result<RedisPool> {
    let manager = r2d2_redis::RedisConnectionManager::new(redis_uri)?;
    Ok(r2d2_redis::r2d2::Pool::builder()
        .connection_timeout(Duration::from_millis(connection_timeout_ms))
        .build_unchecked(manager))
}

#[derive(Clone)]
pub struct RedisCooldown {
    pool: RedisPool,
}

impl RedisCooldown {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CooldownStore for RedisCooldown {
    async fn try_acquire(&self, key: &str, claim: &Claim, ttl_s: u64) -> Result<Option<i64>> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let since = claim.since;
        let value = claim.encode();
        tokio::task::spawn_blocking(move || -> Result<Option<i64>> {
            let mut conn = pool.get()?;
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("NX")
                .arg("EX")
                .arg(ttl_s.max(1))
                .query(&mut *conn)?;
            if acquired.is_some() {
                return Ok(None);
            }
            // the key can expire between SET and GET, the caller then just retries sooner
            let held: Option<String> = conn.get(&key)?;
            Ok(Some(held.as_deref().and_then(Claim::since_of).unwrap_or(since)))
        })
        .await
        .map_err(|e| anyhow!("Redis task panicked: {}", e))?
    }

    async fn release(&self, key: &str, claim: &Claim) -> Result<bool> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let value = claim.encode();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let mut conn = pool.get()?;
            let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
                .key(&key)
                .arg(&value)
                .invoke(&mut *conn)?;
            Ok(deleted == 1)
        })
        .await
        .map_err(|e| anyhow!("Redis task panicked: {}", e))?
    }
}
