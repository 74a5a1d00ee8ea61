//! Redis-backed stock store.

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;

use crate::error::Result;
use crate::stock::StockStore;

/// Seed-if-absent, then conditional decrement. Runs server-side so the
/// check and the decrement cannot interleave with another client.
const CHECK_AND_DECREMENT: &str = r#"
if redis.call('GET', KEYS[1]) == false then
    redis.call('SET', KEYS[1], ARGV[1])
end
local stock = tonumber(redis.call('GET', KEYS[1]))
local deduct = tonumber(ARGV[2])
if stock >= deduct then
    redis.call('DECRBY', KEYS[1], deduct)
    return 1
else
    return 0
end
"#;

/// [`StockStore`] over a shared Redis connection.
#[derive(Clone)]
pub struct RedisStockStore {
    conn: ConnectionManager,
}

impl RedisStockStore {
    /// Connects to Redis.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(%url, "connected to stock store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl StockStore for RedisStockStore {
    async fn check_and_decrement(
        &self,
        key: &str,
        seed: i64,
        quantity: u32,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let applied: i64 = Script::new(CHECK_AND_DECREMENT)
            .key(key)
            .arg(seed)
            .arg(quantity)
            .invoke_async(&mut conn)
            .await?;
        if applied == 1 {
            let _: bool = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl.as_secs())
                .query_async(&mut conn)
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn increment(&self, key: &str, quantity: u32) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(quantity)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn release_lock(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}
