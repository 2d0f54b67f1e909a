//! Read-through caching of single values and ordered lists over a pluggable
//! key-value store. The origin is always authoritative: any cache failure is
//! logged and treated as a miss.

mod memory;
mod redis;

use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    RedisError(#[from] ::redis::RedisError),

    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A key-value store with expiring string values and string lists.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// The whole list, empty when the key is missing or expired.
    async fn list_range(&self, key: &str) -> Result<Vec<String>, CacheError>;

    /// Replace the list at `key` and reset its TTL. Returns the new length.
    async fn list_replace(
        &self,
        key: &str,
        values: &[String],
        ttl: Duration,
    ) -> Result<usize, CacheError>;

    /// Append to an existing list, keeping its TTL. A missing key stays
    /// missing and 0 is returned.
    async fn list_push(&self, key: &str, value: &str) -> Result<usize, CacheError>;
}

#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn CacheStore>,
}

impl CacheAside {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, &raw, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.store.delete(key).await
    }

    /// Return the cached value for `key`, or run `fetch` once and cache its result.
    ///
    /// Only errors from `fetch` are returned, and they are never cached.
    /// Concurrent misses on the same key each run `fetch`; the last write wins.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get(key).await {
            Ok(Some(value)) => {
                debug!(key, "cache hit");
                return Ok(value);
            }
            Ok(None) => debug!(key, "cache miss"),
            Err(e) => warn!(key, error = %e, "cache read failed, fetching from origin"),
        }

        let value = fetch().await?;
        if let Err(e) = self.set(key, &value, ttl).await {
            warn!(key, error = %e, "cache write failed");
        }
        Ok(value)
    }

    /// List flavor of [`CacheAside::get_or_fetch`]: on a miss the fetched
    /// sequence is drained, stored in order with a fresh TTL, and returned.
    ///
    /// An empty list is indistinguishable from a missing key, so empty
    /// results are fetched again on every call.
    pub async fn get_or_fetch_list<T, E, F, S>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Vec<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> S,
        S: Stream<Item = Result<T, E>>,
    {
        match self.cached_list(key).await {
            Ok(Some(values)) => {
                debug!(key, len = values.len(), "cache hit");
                return Ok(values);
            }
            Ok(None) => debug!(key, "cache miss"),
            Err(e) => warn!(key, error = %e, "cache read failed, fetching from origin"),
        }

        let values: Vec<T> = fetch().try_collect().await?;
        if let Err(e) = self.store_list(key, &values, ttl).await {
            warn!(key, error = %e, "cache write failed");
        }
        Ok(values)
    }

    /// Append to a cached list without touching its TTL. Lists that are not
    /// cached are left alone and 0 is returned.
    pub async fn append_to_list<T: Serialize>(&self, key: &str, value: &T) -> Result<usize, CacheError> {
        let raw = serde_json::to_string(value)?;
        self.store.list_push(key, &raw).await
    }

    async fn cached_list<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>, CacheError> {
        let raw = self.store.list_range(key).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let values = raw
            .iter()
            .map(|v| serde_json::from_str(v))
            .collect::<Result<Vec<T>, _>>()?;
        Ok(Some(values))
    }

    async fn store_list<T: Serialize>(
        &self,
        key: &str,
        values: &[T],
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        let raw = values
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        self.store.list_replace(key, &raw, ttl).await
    }
}
