use crate::common::error::Result;
use crate::common::server::{FleetSnapshot, ServerRecord};
use crate::common::utils::{record_key, server_id_from_key};
use crate::traits::cache_store::CacheStore;

fn parse_record(key: &str, value: &str) -> Option<ServerRecord> {
    match serde_json::from_str::<ServerRecord>(value) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("Skipping unreadable cache entry {}: {}", key, e);
            None
        }
    }
}

/// Reads the whole fleet from the cache. Sequence counters and entries that
/// fail to parse are skipped.
pub async fn load_snapshot<C: CacheStore>(cache: &C, prefix: &str) -> Result<FleetSnapshot> {
    let scan_prefix = format!("{}:", prefix);
    let entries = cache.scan_prefix(&scan_prefix).await?;
    let mut snapshot = FleetSnapshot::new();
    for (key, value) in entries {
        let Some(server_id) = server_id_from_key(prefix, &key) else {
            continue;
        };
        if let Some(record) = parse_record(&key, &value) {
            if record.name != server_id {
                log::warn!("Cache entry {} holds record for {}, skipping", key, record.name);
                continue;
            }
            snapshot.insert(server_id.to_string(), record);
        }
    }
    log::debug!("Loaded fleet snapshot with {} server(s)", snapshot.len());
    Ok(snapshot)
}

/// Targeted read of a single server's record.
pub async fn load_record<C: CacheStore>(cache: &C, prefix: &str, server_id: &str) -> Result<Option<ServerRecord>> {
    let key = record_key(prefix, server_id);
    let value = cache.get(&key).await?;
    Ok(value.and_then(|v| parse_record(&key, &v)))
}
