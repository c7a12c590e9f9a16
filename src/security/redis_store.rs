//! Redis-backed counter store shared by every gateway instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::security::store::{CounterStore, StoreError};

/// INCR and set the expiry only on first increment, in one round trip.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Counter store on top of a multiplexed, auto-reconnecting redis connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    /// Open a connection to `url`. Fails if redis is unreachable at startup.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(url = %url, "Connected to redis counter store");
        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let count: u64 = self
            .script
            .key(key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = conn.get(key).await?;
        Ok(value)
    }
}
