use super::{CacheError, CacheStore};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to redis cache");
        Ok(Self { conn })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs(ttl)).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(key, 0, -1).await?;
        Ok(values)
    }

    async fn list_replace(
        &self,
        key: &str,
        values: &[String],
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        if values.is_empty() {
            let _: i64 = conn.del(key).await?;
            return Ok(0);
        }

        let _: () = redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .rpush(key, values)
            .ignore()
            .expire(key, ttl_secs(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(values.len())
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        // RPUSHX: a missing key stays missing
        let len: usize = conn.rpush_exists(key, value).await?;
        Ok(len)
    }
}
