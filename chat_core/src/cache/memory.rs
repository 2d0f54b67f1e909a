use super::{CacheError, CacheStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

enum Value {
    Scalar(String),
    List(Vec<String>),
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process cache. Expired entries are dropped lazily when touched.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, key: &str, f: impl FnOnce(&Value) -> Option<R>) -> Option<R> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return f(&entry.value);
            }
        } else {
            return None;
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.read(key, |value| match value {
            Value::Scalar(s) => Some(s.clone()),
            Value::List(_) => None,
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let entry = Entry {
            value: Value::Scalar(value.to_string()),
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.expires_at > now))
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .read(key, |value| match value {
                Value::List(values) => Some(values.clone()),
                Value::Scalar(_) => None,
            })
            .unwrap_or_default())
    }

    async fn list_replace(
        &self,
        key: &str,
        values: &[String],
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        if values.is_empty() {
            self.entries.remove(key);
            return Ok(0);
        }
        let entry = Entry {
            value: Value::List(values.to_vec()),
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(values.len())
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize, CacheError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.expires_at > now => match &mut entry.value {
                Value::List(values) => {
                    values.push(value.to_string());
                    Ok(values.len())
                }
                Value::Scalar(_) => Ok(0),
            },
            _ => Ok(0),
        }
    }
}
