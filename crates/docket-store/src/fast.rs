//! Fast tier: short-lived JSON values keyed by string.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use serde_json::Value;

use crate::StoreError;

/// Key/value tier in front of the durable store.
///
/// Implementations may be remote, so every call is fallible; callers treat
/// an error as a miss.
#[async_trait]
pub trait FastCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
struct Entry {
    value: Arc<Value>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process fast tier backed by moka, with a TTL per entry.
#[derive(Clone)]
pub struct MokaCache {
    inner: Cache<String, Entry>,
}

impl MokaCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { inner }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[async_trait]
impl FastCache for MokaCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.inner.get(key).await.map(|e| (*e.value).clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        if ttl.is_zero() {
            self.inner.invalidate(key).await;
            return Ok(());
        }
        let entry = Entry {
            value: Arc::new(value),
            ttl,
        };
        self.inner.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.invalidate(key).await;
        Ok(())
    }
}
