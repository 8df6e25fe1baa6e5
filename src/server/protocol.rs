use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use uuid::Uuid;

use crate::broker::message_bus_impl::MessageBusImpl;
use crate::common::config::SyncConfig;
use crate::common::error::{Result, SyncError};
use crate::common::event::{ChangeEvent, EventKind};
use crate::common::server::{LocalServer, ServerAddress, ServerRecord, ServerStatus, SyncPlayer};
use crate::common::utils::{claim_key, is_valid_server_id, now_ms, record_key, seq_key};
use crate::registry::server_registry::{ApplyOutcome, ServerRegistry};
use crate::registry::snapshot::load_record;
use crate::storage::cache_store_impl::CacheStoreImpl;
use crate::traits::cache_store::CacheStore;
use crate::traits::message_bus::{BusMessage, MessageBus};

/// Proxy-side hook, told when a server starts or stops being routable.
pub trait FleetListener: Send + Sync {
    fn server_available(&self, record: &ServerRecord);
    fn server_unavailable(&self, server_id: &str);
}

/// Keeps the shared cache and this process's registry convergent.
///
/// Local mutations are committed write-then-notify: sequence increment,
/// cache write, local install, then publish. Received events are applied by
/// sequence; a gap triggers a targeted re-read of that server from the cache.
pub struct SyncProtocol {
    instance_id: String,
    topic: String,
    key_prefix: String,
    bootstrap_on_gap: bool,
    record_ttl: Option<Duration>,
    liveness_timeout_ms: i64,
    claim_ttl: Duration,
    cache: Arc<CacheStoreImpl>,
    bus: Arc<MessageBusImpl>,
    registry: Arc<ServerRegistry>,
    owned: DashSet<String>,
    guards: DashMap<String, Arc<Mutex<()>>>,
    degraded: AtomicBool,
    listeners: Vec<Arc<dyn FleetListener>>,
}

impl SyncProtocol {
    pub fn new(
        config: &SyncConfig,
        instance_id: String,
        cache: Arc<CacheStoreImpl>,
        bus: Arc<MessageBusImpl>,
        registry: Arc<ServerRegistry>,
    ) -> Self {
        Self {
            instance_id,
            topic: config.topic.clone(),
            key_prefix: config.key_prefix.clone(),
            bootstrap_on_gap: config.bootstrap_on_gap,
            record_ttl: config.record_ttl_secs.map(Duration::from_secs),
            liveness_timeout_ms: config.liveness_timeout_ms as i64,
            claim_ttl: Duration::from_millis(config.liveness_timeout_ms),
            cache,
            bus,
            registry,
            owned: DashSet::new(),
            guards: DashMap::new(),
            degraded: AtomicBool::new(false),
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn FleetListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<CacheStoreImpl> {
        &self.cache
    }

    pub fn bus(&self) -> &Arc<MessageBusImpl> {
        &self.bus
    }

    /// True while the last cache or bus call failed after its retries. The
    /// registry keeps serving its last known state in the meantime.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn owns(&self, server_id: &str) -> bool {
        self.owned.contains(server_id)
    }

    pub fn owned_servers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.owned.iter().map(|id| id.key().clone()).collect();
        ids.sort();
        ids
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    log::info!("Connectivity restored, leaving degraded mode");
                }
            }
            Err(e) if e.is_unavailable() => {
                if !self.degraded.swap(true, Ordering::SeqCst) {
                    log::error!("Entering degraded mode, serving last known fleet state: {}", e);
                }
            }
            Err(_) => {}
        }
        result
    }

    fn notify(&self, server_id: &str, before: Option<&ServerRecord>, after: Option<&ServerRecord>) {
        let was = before.is_some_and(|r| r.is_routable());
        let is = after.is_some_and(|r| r.is_routable());
        match (was, is, after) {
            (false, true, Some(record)) => {
                for listener in &self.listeners {
                    listener.server_available(record);
                }
            }
            (true, false, _) => {
                for listener in &self.listeners {
                    listener.server_unavailable(server_id);
                }
            }
            _ => {}
        }
    }

    /// Routes every delivery on the fleet topic into `tx`. Deliveries queue
    /// there until a consumer drains them, so subscribing before `bootstrap`
    /// loses nothing.
    pub async fn subscribe(&self, tx: mpsc::UnboundedSender<BusMessage>) -> Result<()> {
        let handler = Arc::new(move |msg: BusMessage| {
            if tx.send(msg).is_err() {
                log::debug!("Consumer gone, dropping delivery");
            }
        });
        self.track(self.bus.subscribe(&self.topic, handler).await)
    }

    /// Full reload of the registry from the cache.
    pub async fn bootstrap(&self) -> Result<usize> {
        let before = self.registry.snapshot();
        let count = self.track(self.registry.bootstrap(&*self.cache, &self.key_prefix).await)?;
        let after = self.registry.snapshot();
        for (server_id, record) in &before {
            self.notify(server_id, Some(record), after.get(server_id));
        }
        for (server_id, record) in &after {
            if !before.contains_key(server_id) {
                self.notify(server_id, None, Some(record));
            }
        }
        Ok(count)
    }

    /// Targeted resync of one server; `floor` is the highest sequence known to
    /// have been committed for it.
    pub async fn resync(&self, server_id: &str, floor: u64) -> Result<bool> {
        let record = self.track(load_record(&*self.cache, &self.key_prefix, server_id).await)?;
        let before = self.registry.lookup(server_id);
        let cache_seq = record.as_ref().map(|r| r.sequence);
        let changed = self.registry.adopt(server_id, record, floor);
        let after = self.registry.lookup(server_id);
        self.notify(server_id, before.as_ref(), after.as_ref());
        log::info!(
            "Resynced {} from cache (cache seq {:?}, local seq {})",
            server_id,
            cache_seq,
            self.registry.last_sequence(server_id)
        );
        Ok(changed)
    }

    /// Decodes and applies one bus payload. Malformed payloads are logged and
    /// dropped.
    pub async fn handle_payload(&self, payload: &str) -> Option<ApplyOutcome> {
        let event = match ChangeEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Dropping event: {}", e);
                return None;
            }
        };
        match self.handle_event(&event).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::error!(
                    "Failed to handle {} for {} (seq {}): {}",
                    event.body.name(),
                    event.server_id,
                    event.sequence,
                    e
                );
                None
            }
        }
    }

    pub async fn handle_event(&self, event: &ChangeEvent) -> Result<ApplyOutcome> {
        let server_id = event.server_id.as_str();
        if event.origin == self.instance_id && self.registry.last_sequence(server_id) >= event.sequence {
            log::debug!("Skipping own {} for {}", event.body.name(), server_id);
            return Ok(ApplyOutcome::Ignored);
        }

        let before = self.registry.lookup(server_id);
        let outcome = self.registry.apply(event);
        match outcome {
            ApplyOutcome::Applied => {
                let after = self.registry.lookup(server_id);
                self.notify(server_id, before.as_ref(), after.as_ref());
                log::debug!("Applied {} for {} (seq {})", event.body.name(), server_id, event.sequence);
            }
            ApplyOutcome::Ignored => {
                log::debug!(
                    "Ignoring stale {} for {} (seq {}, local {})",
                    event.body.name(),
                    server_id,
                    event.sequence,
                    self.registry.last_sequence(server_id)
                );
            }
            ApplyOutcome::Desync { expected, received } => {
                let desync = SyncError::DesyncDetected {
                    server_id: server_id.to_string(),
                    expected,
                    received,
                };
                if self.bootstrap_on_gap {
                    log::warn!("{}, resyncing from cache", desync);
                    self.resync(server_id, received).await?;
                } else {
                    log::warn!("{}, applying without resync", desync);
                    self.registry.apply_across_gap(event);
                    let after = self.registry.lookup(server_id);
                    self.notify(server_id, before.as_ref(), after.as_ref());
                }
            }
        }
        self.release_if_taken(server_id);
        Ok(outcome)
    }

    // Another instance re-announced a server this one still held.
    fn release_if_taken(&self, server_id: &str) {
        if !self.owns(server_id) {
            return;
        }
        if let Some(record) = self.registry.lookup(server_id) {
            if record.owner != self.instance_id {
                self.owned.remove(server_id);
                log::warn!("Ownership of {} moved to {}", server_id, record.owner);
            }
        }
    }

    async fn lock_server(&self, server_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.guards.entry(server_id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    // Called with the guard held: the map and that guard are the only
    // references unless someone else is waiting on it.
    fn forget_guard(&self, server_id: &str) {
        self.guards.remove_if(server_id, |_, lock| Arc::strong_count(lock) <= 2);
    }

    /// Takes or refreshes this instance's fleet-wide claim on `server_id`.
    /// The claim lapses after `liveness_timeout` without a refresh.
    async fn claim(&self, server_id: &str) -> Result<()> {
        let key = claim_key(&self.key_prefix, server_id);
        let holder = self.track(self.cache.claim(&key, &self.instance_id, self.claim_ttl).await)?;
        if holder == self.instance_id {
            return Ok(());
        }
        if self.owned.remove(server_id).is_some() {
            log::warn!("Lost claim on {} to instance {}", server_id, holder);
        }
        Err(SyncError::DuplicateServerId {
            server_id: server_id.to_string(),
            owner: holder,
        })
    }

    async fn release_claim(&self, server_id: &str) {
        let key = claim_key(&self.key_prefix, server_id);
        if let Err(e) = self.track(self.cache.release(&key, &self.instance_id).await) {
            log::warn!("Could not release claim on {}, leaving it to expire: {}", server_id, e);
        }
    }

    fn owned_record(&self, server_id: &str) -> Result<ServerRecord> {
        if !self.owns(server_id) {
            return Err(SyncError::NotOwner(server_id.to_string()));
        }
        self.registry
            .lookup(server_id)
            .ok_or_else(|| SyncError::UnknownServer(server_id.to_string()))
    }

    /// Write-then-notify commit of one owner-side mutation. `build` receives
    /// the new sequence and the commit timestamp.
    async fn commit<F>(&self, server_id: &str, build: F) -> Result<ServerRecord>
    where
        F: FnOnce(u64, i64) -> (ServerRecord, EventKind),
    {
        let seq = self.track(self.cache.incr(&seq_key(&self.key_prefix, server_id)).await)?;
        let now = now_ms();
        let (mut record, body) = build(seq, now);
        record.sequence = seq;
        let value = serde_json::to_string(&record)?;
        self.track(
            self.cache
                .set(&record_key(&self.key_prefix, server_id), &value, self.record_ttl)
                .await,
        )?;

        let before = self.registry.lookup(server_id);
        self.registry.install(record.clone());
        self.notify(server_id, before.as_ref(), Some(&record));

        let event = ChangeEvent::new(server_id, seq, &self.instance_id, now, body);
        self.track(self.bus.publish(&self.topic, &event).await)?;
        log::debug!("Committed {} for {} (seq {})", event.body.name(), server_id, seq);
        Ok(record)
    }

    /// Publishes an owned record again at its own sequence without taking a
    /// new one. Peers that already hold it ignore the event; peers that missed
    /// the original commit apply it or resync.
    async fn republish(&self, record: ServerRecord) -> Result<ServerRecord> {
        let event = ChangeEvent::new(
            &record.name,
            record.sequence,
            &self.instance_id,
            record.last_heartbeat,
            presence(&record),
        );
        self.track(self.bus.publish(&self.topic, &event).await)?;
        log::debug!("Republished {} (seq {})", record.name, record.sequence);
        Ok(record)
    }

    /// Registers a server hosted by this process and announces it ONLINE.
    /// Fails with `DuplicateServerId` while another live instance holds the
    /// id's claim.
    pub async fn register(&self, server: &LocalServer) -> Result<ServerRecord> {
        if !is_valid_server_id(&server.name) {
            return Err(SyncError::InvalidServerId(server.name.clone()));
        }
        let _guard = self.lock_server(&server.name).await;
        if let Err(e) = self.claim(&server.name).await {
            if let SyncError::DuplicateServerId { owner, .. } = &e {
                log::warn!("Rejecting registration of {}: claimed by live instance {}", server.name, owner);
            }
            if !self.owns(&server.name) {
                self.forget_guard(&server.name);
            }
            return Err(e);
        }
        let record = self.announce_fresh(&server.name, server.address(), server.max_players).await?;
        self.owned.insert(server.name.clone());
        log::info!("Registered {} at {} (seq {})", record.name, record.address, record.sequence);
        Ok(record)
    }

    async fn announce_fresh(&self, server_id: &str, address: ServerAddress, max_players: u32) -> Result<ServerRecord> {
        let owner = self.instance_id.clone();
        self.commit(server_id, move |seq, now| {
            let record = ServerRecord::announced(server_id, address.clone(), max_players, &owner, seq, now);
            (record, EventKind::Announced { address, max_players })
        })
        .await
    }

    /// Moves an owned server to `status`. ONLINE after OFFLINE starts a fresh
    /// lifecycle; any other backwards move is rejected. Announcing the current
    /// status publishes the record again, so a caller can retry after
    /// `BusUnavailable`.
    pub async fn announce(&self, server_id: &str, status: ServerStatus) -> Result<ServerRecord> {
        let _guard = self.lock_server(server_id).await;
        let current = self.owned_record(server_id)?;
        if current.status == status {
            return self.republish(current).await;
        }
        if status == ServerStatus::Online {
            if current.status != ServerStatus::Offline {
                return Err(SyncError::InvalidTransition {
                    server_id: server_id.to_string(),
                    from: current.status,
                    to: status,
                });
            }
            self.claim(server_id).await?;
            log::info!("Re-announcing {} with a fresh lifecycle", server_id);
            return self
                .announce_fresh(server_id, current.address.clone(), current.max_players)
                .await;
        }
        if !current.status.can_transition_to(status) {
            return Err(SyncError::InvalidTransition {
                server_id: server_id.to_string(),
                from: current.status,
                to: status,
            });
        }
        let record = self
            .commit(server_id, move |_, _| {
                let mut record = current;
                record.status = status;
                (record, EventKind::StatusChanged { status })
            })
            .await?;
        if status == ServerStatus::Offline {
            self.release_claim(server_id).await;
        }
        Ok(record)
    }

    /// Refreshes the liveness and presence of an owned server, along with its
    /// claim. Fails with `DuplicateServerId`, and stops owning the server,
    /// when the claim lapsed and another instance took the id.
    pub async fn heartbeat(&self, server_id: &str) -> Result<ServerRecord> {
        let _guard = self.lock_server(server_id).await;
        let current = self.owned_record(server_id)?;
        if current.status != ServerStatus::Offline {
            self.claim(server_id).await?;
        }
        self.commit(server_id, move |_, now| {
            let mut record = current;
            record.last_heartbeat = now;
            let body = presence(&record);
            (record, body)
        })
        .await
    }

    pub async fn player_joined(&self, server_id: &str, player: SyncPlayer) -> Result<ServerRecord> {
        let _guard = self.lock_server(server_id).await;
        let current = self.owned_record(server_id)?;
        self.commit(server_id, move |_, _| {
            let mut record = current;
            record.add_player(player.clone());
            (record, EventKind::PlayerJoined { player })
        })
        .await
    }

    pub async fn player_left(&self, server_id: &str, uuid: Uuid) -> Result<ServerRecord> {
        let _guard = self.lock_server(server_id).await;
        let current = self.owned_record(server_id)?;
        self.commit(server_id, move |_, _| {
            let mut record = current;
            record.remove_player(&uuid);
            (record, EventKind::PlayerLeft { uuid })
        })
        .await
    }

    pub async fn set_max_players(&self, server_id: &str, max_players: u32) -> Result<ServerRecord> {
        let _guard = self.lock_server(server_id).await;
        let current = self.owned_record(server_id)?;
        self.commit(server_id, move |_, _| {
            let mut record = current;
            record.max_players = max_players;
            (record, EventKind::CapacityChanged { max_players })
        })
        .await
    }

    /// Removes an owned server from the fleet. The sequence counter is kept so
    /// a later registration continues above it.
    pub async fn deregister(&self, server_id: &str) -> Result<()> {
        let _guard = self.lock_server(server_id).await;
        if !self.owns(server_id) {
            return Err(SyncError::NotOwner(server_id.to_string()));
        }
        let seq = self.track(self.cache.incr(&seq_key(&self.key_prefix, server_id)).await)?;
        self.track(self.cache.delete(&record_key(&self.key_prefix, server_id)).await)?;

        let before = self.registry.lookup(server_id);
        self.registry.remove(server_id, seq);
        self.owned.remove(server_id);
        self.notify(server_id, before.as_ref(), None);
        self.release_claim(server_id).await;
        self.forget_guard(server_id);

        let event = ChangeEvent::new(server_id, seq, &self.instance_id, now_ms(), EventKind::Deregistered);
        self.track(self.bus.publish(&self.topic, &event).await)?;
        log::info!("Deregistered {} (seq {})", server_id, seq);
        Ok(())
    }

    /// Liveness sweep. Other instances' stale records are marked OFFLINE in
    /// this registry only. An owned record only goes stale when this
    /// instance's own heartbeats failed, so it is heartbeated again instead.
    /// Returns the ids marked offline.
    pub async fn sweep_expired(&self, now: i64) -> Vec<String> {
        let expired = self
            .registry
            .sweep_expired(now, self.liveness_timeout_ms, |id| self.owns(id));
        let mut ids: Vec<String> = Vec::with_capacity(expired.len());
        for before in expired {
            let after = self.registry.lookup(&before.name);
            self.notify(&before.name, Some(&before), after.as_ref());
            ids.push(before.name);
        }

        for server_id in self.owned_servers() {
            let stale = self.registry.lookup(&server_id).is_some_and(|r| {
                r.status != ServerStatus::Offline && r.is_stale(now, self.liveness_timeout_ms)
            });
            if !stale {
                continue;
            }
            match self.heartbeat(&server_id).await {
                Ok(record) => log::info!("Refreshed own stale server {} (seq {})", server_id, record.sequence),
                Err(e) => log::warn!("Could not refresh own stale server {}: {}", server_id, e),
            }
        }
        ids
    }
}

/// Full-state event body for `record`.
fn presence(record: &ServerRecord) -> EventKind {
    EventKind::Heartbeat {
        address: record.address.clone(),
        status: record.status,
        max_players: record.max_players,
        players: record.players.clone(),
    }
}
