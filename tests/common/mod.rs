#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use serversync::broker::memory::memory_bus::{MemoryBus, MemoryHub};
use serversync::broker::message_bus_impl::MessageBusImpl;
use serversync::common::config::{BackendType, SyncConfig};
use serversync::common::server::{LocalServer, ServerRecord};
use serversync::registry::server_registry::{ApplyOutcome, ServerRegistry};
use serversync::registry::snapshot::load_record;
use serversync::server::protocol::{FleetListener, SyncProtocol};
use serversync::storage::cache_store_impl::CacheStoreImpl;
use serversync::storage::memory::memory_cache_store::MemoryCacheStore;
use serversync::traits::message_bus::BusMessage;

pub fn test_config() -> SyncConfig {
    SyncConfig {
        cache_backend: BackendType::Memory,
        bus_backend: BackendType::Memory,
        heartbeat_interval_ms: 60_000,
        liveness_timeout_ms: 120_000,
        sweep_interval_ms: 60_000,
        apply_workers: 2,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..SyncConfig::default()
    }
}

pub fn local(name: &str) -> LocalServer {
    LocalServer {
        name: name.to_string(),
        host: "10.0.0.12".to_string(),
        port: 25565,
        max_players: 100,
    }
}

/// One simulated instance sharing `cache` and `hub` with its peers.
pub fn node(
    config: &SyncConfig,
    instance_id: &str,
    cache: &MemoryCacheStore,
    hub: &MemoryHub,
    listener: Option<Arc<dyn FleetListener>>,
) -> Arc<SyncProtocol> {
    let protocol = SyncProtocol::new(
        config,
        instance_id.to_string(),
        Arc::new(CacheStoreImpl::Memory(cache.clone())),
        Arc::new(MessageBusImpl::Memory(hub.client())),
        Arc::new(ServerRegistry::new()),
    );
    let protocol = match listener {
        Some(listener) => protocol.with_listener(listener),
        None => protocol,
    };
    Arc::new(protocol)
}

pub fn memory_bus(protocol: &SyncProtocol) -> &MemoryBus {
    match protocol.bus().as_ref() {
        MessageBusImpl::Memory(bus) => bus,
        MessageBusImpl::Redis(_) => panic!("expected the memory bus"),
    }
}

pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl FleetListener for RecordingListener {
    fn server_available(&self, record: &ServerRecord) {
        self.events.lock().unwrap().push(format!("+{}", record.name));
    }

    fn server_unavailable(&self, server_id: &str) {
        self.events.lock().unwrap().push(format!("-{}", server_id));
    }
}

pub async fn subscribed(protocol: &SyncProtocol) -> UnboundedReceiver<BusMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    protocol.subscribe(tx).await.unwrap();
    rx
}

/// Applies every delivery queued for `protocol`, in order.
pub async fn pump(protocol: &SyncProtocol, rx: &mut UnboundedReceiver<BusMessage>) -> Vec<Option<ApplyOutcome>> {
    let mut outcomes = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        outcomes.push(protocol.handle_payload(&msg.payload).await);
    }
    outcomes
}

/// Discards queued deliveries, as if the bus had lost them.
pub fn drop_pending(rx: &mut UnboundedReceiver<BusMessage>) -> usize {
    let mut dropped = 0;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}

pub async fn cached(cache: &MemoryCacheStore, server_id: &str) -> Option<ServerRecord> {
    load_record(cache, "fleet:server", server_id).await.unwrap()
}
