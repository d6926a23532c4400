use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tracing::info;

use super::backend::KvBackend;
use super::error::CacheError;

const SCAN_BATCH: usize = 500;

/// Redis-backed store. `ConnectionManager` reconnects on its own and is cheap
/// to clone, so every command runs on a clone.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        info!("Connected to Redis cache backend");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn millis(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry.
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KvBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut self.conn()).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: usize = redis::cmd("DEL").arg(keys).query_async(&mut self.conn()).await?;
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        // -2: missing key, -1: no expiry.
        let ms: i64 = redis::cmd("PTTL").arg(key).query_async(&mut self.conn()).await?;
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let applied: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut self.conn())
            .await?;
        Ok(applied)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<usize, CacheError> {
        if members.is_empty() {
            return Ok(0);
        }
        let added: usize = redis::cmd("SADD").arg(key).arg(members).query_async(&mut self.conn()).await?;
        Ok(added)
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<usize, CacheError> {
        if members.is_empty() {
            return Ok(0);
        }
        let removed: usize = redis::cmd("SREM").arg(key).arg(members).query_async(&mut self.conn()).await?;
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut self.conn()).await?;
        Ok(members)
    }

    async fn scard(&self, key: &str) -> Result<usize, CacheError> {
        let count: usize = redis::cmd("SCARD").arg(key).query_async(&mut self.conn()).await?;
        Ok(count)
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut self.conn()).await?;
        Ok(value)
    }

    async fn decr(&self, key: &str) -> Result<i64, CacheError> {
        let value: i64 = redis::cmd("DECR").arg(key).query_async(&mut self.conn()).await?;
        Ok(value)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        found.sort();
        found.dedup();
        Ok(found)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let reply: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Backend(format!("unexpected PING reply: {}", reply)))
        }
    }
}
