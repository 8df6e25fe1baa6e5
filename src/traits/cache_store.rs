use std::time::Duration;

use crate::common::error::Result;

/// Shared key-value store holding the authoritative fleet snapshot.
///
/// Connection loss surfaces as `SyncError::CacheUnavailable`, never as an
/// empty or stale answer.
#[trait_variant::make(CacheStore: Send)]
pub trait UnsendCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Not retried by implementations; partial results are worse than an error.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
    async fn incr(&self, key: &str) -> Result<u64>;
    /// Atomically takes `key` for `owner` when it is free or already held by
    /// `owner`, refreshing its expiry to `ttl`. Returns the holder after the
    /// call.
    async fn claim(&self, key: &str, owner: &str, ttl: Duration) -> Result<String>;
    /// Deletes `key` only while `owner` holds it.
    async fn release(&self, key: &str, owner: &str) -> Result<bool>;
}
