use std::time::Duration;

use crate::common::error::{Result, SyncError};
use crate::storage::redis::redis_client::RedisClient;
use crate::traits::cache_store::CacheStore;

pub struct RedisCacheStore {
    client: RedisClient,
}

impl RedisCacheStore {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

fn unavailable(op: &str, key: &str, e: redis::RedisError) -> SyncError {
    log::error!("Redis {} failed for key {}: {}", op, key, e);
    SyncError::CacheUnavailable(format!("{} {}: {}", op, key, e))
}

impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.client.get(key).await.map_err(|e| unavailable("GET", key, e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.client
            .set(key, value, ttl)
            .await
            .map_err(|e| unavailable("SET", key, e))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self.client.del(key).await {
            Ok(0) => {
                log::debug!("Key {} was already absent", key);
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(e) => Err(unavailable("DEL", key, e)),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.client
            .scan_prefix(prefix)
            .await
            .map_err(|e| unavailable("SCAN", prefix, e))
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        self.client.incr(key).await.map_err(|e| unavailable("INCR", key, e))
    }

    async fn claim(&self, key: &str, owner: &str, ttl: Duration) -> Result<String> {
        self.client
            .claim(key, owner, ttl)
            .await
            .map_err(|e| unavailable("CLAIM", key, e))
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool> {
        self.client
            .release(key, owner)
            .await
            .map(|removed| removed > 0)
            .map_err(|e| unavailable("RELEASE", key, e))
    }
}
