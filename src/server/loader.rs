use anyhow::Result;
use std::sync::Arc;

use crate::broker::memory::memory_bus::MemoryHub;
use crate::broker::message_bus_impl::MessageBusImpl;
use crate::broker::redis::redis_bus::RedisBus;
use crate::common::config::{BackendType, SyncConfig};
use crate::registry::server_registry::ServerRegistry;
use crate::server::protocol::{FleetListener, SyncProtocol};
use crate::storage::cache_store_impl::CacheStoreImpl;
use crate::storage::memory::memory_cache_store::MemoryCacheStore;
use crate::storage::redis::redis_cache_store::RedisCacheStore;
use crate::storage::redis::redis_client::RedisClient;

pub async fn load_cache_store(config: &SyncConfig) -> Result<CacheStoreImpl> {
    let cache_store = match config.cache_backend {
        BackendType::Redis => {
            log::debug!("Using Redis cache store at {}", config.cache_url);
            let client = RedisClient::connect(&config.cache_url, config.op_timeout(), config.retry_policy()).await?;
            CacheStoreImpl::Redis(RedisCacheStore::new(client))
        }
        BackendType::Memory => {
            log::debug!("Using in-process cache store");
            CacheStoreImpl::Memory(MemoryCacheStore::new())
        }
    };
    Ok(cache_store)
}

pub async fn load_message_bus(config: &SyncConfig) -> Result<MessageBusImpl> {
    let bus = match config.bus_backend {
        BackendType::Redis => {
            log::debug!("Using Redis pub/sub bus at {}", config.bus_url);
            let publisher = RedisClient::connect(&config.bus_url, config.op_timeout(), config.retry_policy()).await?;
            MessageBusImpl::Redis(RedisBus::connect(publisher, config.retry_policy()).await?)
        }
        BackendType::Memory => {
            log::debug!("Using in-process message bus");
            MessageBusImpl::Memory(MemoryHub::new().client())
        }
    };
    Ok(bus)
}

/// Connects both backends and wires a protocol around a fresh registry.
pub async fn load_protocol(config: &SyncConfig, listeners: Vec<Arc<dyn FleetListener>>) -> Result<Arc<SyncProtocol>> {
    let cache = Arc::new(load_cache_store(config).await?);
    let bus = Arc::new(load_message_bus(config).await?);
    let instance_id = config.resolve_instance_id();
    log::info!("Sync instance id: {}", instance_id);
    let protocol = listeners.into_iter().fold(
        SyncProtocol::new(config, instance_id, cache, bus, Arc::new(ServerRegistry::new())),
        |protocol, listener| protocol.with_listener(listener),
    );
    Ok(Arc::new(protocol))
}
