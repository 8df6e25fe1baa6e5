use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::common::error::{Result, SyncError};
use crate::traits::cache_store::CacheStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process cache. Clones share the same key space, so several protocol
/// instances in one process see one "remote" store.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<Mutex<BTreeMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::CacheUnavailable(format!("{}: memory store offline", op)));
        }
        Ok(())
    }
}

impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check("GET")?;
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.check("SET")?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check("DEL")?;
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some_and(|e| e.is_live(Instant::now())))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.check("SCAN")?;
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        self.check("INCR")?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let current = match entries.get(key).filter(|e| e.is_live(now)) {
            Some(e) => e.value.parse::<u64>().map_err(|_| {
                SyncError::CacheUnavailable(format!("INCR {}: value is not an integer", key))
            })?,
            None => 0,
        };
        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn claim(&self, key: &str, owner: &str, ttl: Duration) -> Result<String> {
        self.check("CLAIM")?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some(holder) = entries.get(key).filter(|e| e.is_live(now) && e.value != owner) {
            return Ok(holder.value.clone());
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: owner.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(owner.to_string())
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool> {
        self.check("RELEASE")?;
        let mut entries = self.entries.lock().await;
        let held = entries
            .get(key)
            .is_some_and(|e| e.is_live(Instant::now()) && e.value == owner);
        if held {
            entries.remove(key);
        }
        Ok(held)
    }
}
