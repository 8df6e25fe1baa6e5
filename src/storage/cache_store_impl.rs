use std::time::Duration;

use crate::common::error::Result;
use crate::storage::memory::memory_cache_store::MemoryCacheStore;
use crate::storage::redis::redis_cache_store::RedisCacheStore;
use crate::traits::cache_store::CacheStore;

pub enum CacheStoreImpl {
    Redis(RedisCacheStore),
    Memory(MemoryCacheStore),
}

impl CacheStore for CacheStoreImpl {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            CacheStoreImpl::Redis(r) => r.get(key).await,
            CacheStoreImpl::Memory(m) => m.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        match self {
            CacheStoreImpl::Redis(r) => r.set(key, value, ttl).await,
            CacheStoreImpl::Memory(m) => m.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self {
            CacheStoreImpl::Redis(r) => r.delete(key).await,
            CacheStoreImpl::Memory(m) => m.delete(key).await,
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        match self {
            CacheStoreImpl::Redis(r) => r.scan_prefix(prefix).await,
            CacheStoreImpl::Memory(m) => m.scan_prefix(prefix).await,
        }
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        match self {
            CacheStoreImpl::Redis(r) => r.incr(key).await,
            CacheStoreImpl::Memory(m) => m.incr(key).await,
        }
    }

    async fn claim(&self, key: &str, owner: &str, ttl: Duration) -> Result<String> {
        match self {
            CacheStoreImpl::Redis(r) => r.claim(key, owner, ttl).await,
            CacheStoreImpl::Memory(m) => m.claim(key, owner, ttl).await,
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool> {
        match self {
            CacheStoreImpl::Redis(r) => r.release(key, owner).await,
            CacheStoreImpl::Memory(m) => m.release(key, owner).await,
        }
    }
}
