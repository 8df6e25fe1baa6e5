use serversync::common::event::{ChangeEvent, EventKind};
use serversync::common::server::{ServerAddress, ServerRecord, ServerStatus, SyncPlayer};
use serversync::registry::server_registry::{ApplyOutcome, ServerRegistry};
use serversync::storage::memory::memory_cache_store::MemoryCacheStore;
use serversync::traits::cache_store::CacheStore;
use uuid::Uuid;

fn address() -> ServerAddress {
    ServerAddress {
        host: "10.0.0.12".to_string(),
        port: 25565,
    }
}

fn event(server_id: &str, sequence: u64, body: EventKind) -> ChangeEvent {
    ChangeEvent::new(server_id, sequence, "instance-x", 1_000 + sequence as i64, body)
}

fn announced(server_id: &str, sequence: u64) -> ChangeEvent {
    event(
        server_id,
        sequence,
        EventKind::Announced {
            address: address(),
            max_players: 100,
        },
    )
}

#[test]
fn applying_the_same_event_twice_is_a_no_op() {
    let registry = ServerRegistry::new();
    let joined = event(
        "lobby-1",
        2,
        EventKind::PlayerJoined {
            player: SyncPlayer::new(Uuid::new_v4(), "steve"),
        },
    );

    assert_eq!(registry.apply(&announced("lobby-1", 1)), ApplyOutcome::Applied);
    assert_eq!(registry.apply(&joined), ApplyOutcome::Applied);
    let once = registry.lookup("lobby-1").unwrap();

    assert_eq!(registry.apply(&joined), ApplyOutcome::Ignored);
    assert_eq!(registry.lookup("lobby-1").unwrap(), once);
    assert_eq!(once.player_count(), 1);
}

#[test]
fn older_events_never_regress_state() {
    let registry = ServerRegistry::new();
    registry.apply(&announced("lobby-1", 1));
    registry.apply(&event(
        "lobby-1",
        2,
        EventKind::StatusChanged {
            status: ServerStatus::Draining,
        },
    ));

    let replay = announced("lobby-1", 1);
    assert_eq!(registry.apply(&replay), ApplyOutcome::Ignored);
    let record = registry.lookup("lobby-1").unwrap();
    assert_eq!(record.status, ServerStatus::Draining);
    assert_eq!(record.sequence, 2);
}

#[test]
fn sequence_gap_is_reported_and_not_applied() {
    let registry = ServerRegistry::new();
    registry.apply(&announced("lobby-1", 1));
    let outcome = registry.apply(&event(
        "lobby-1",
        3,
        EventKind::CapacityChanged { max_players: 50 },
    ));

    assert_eq!(
        outcome,
        ApplyOutcome::Desync {
            expected: 2,
            received: 3
        }
    );
    assert_eq!(registry.last_sequence("lobby-1"), 1);
    assert_eq!(registry.lookup("lobby-1").unwrap().max_players, 100);
}

#[test]
fn apply_across_gap_accepts_the_event() {
    let registry = ServerRegistry::new();
    registry.apply(&announced("lobby-1", 1));
    let capacity = event("lobby-1", 4, EventKind::CapacityChanged { max_players: 50 });

    assert_eq!(registry.apply_across_gap(&capacity), ApplyOutcome::Applied);
    assert_eq!(registry.last_sequence("lobby-1"), 4);
    assert_eq!(registry.lookup("lobby-1").unwrap().max_players, 50);
}

#[test]
fn delta_for_unknown_server_is_a_desync() {
    let registry = ServerRegistry::new();
    let outcome = registry.apply(&event(
        "lobby-1",
        1,
        EventKind::StatusChanged {
            status: ServerStatus::Draining,
        },
    ));
    assert!(matches!(outcome, ApplyOutcome::Desync { .. }));
    assert!(registry.lookup("lobby-1").is_none());
}

#[test]
fn heartbeat_materializes_an_unknown_server() {
    let registry = ServerRegistry::new();
    let steve = SyncPlayer::new(Uuid::new_v4(), "steve");
    let heartbeat = event(
        "survival",
        1,
        EventKind::Heartbeat {
            address: address(),
            status: ServerStatus::Online,
            max_players: 20,
            players: vec![steve.clone()],
        },
    );

    assert_eq!(registry.apply(&heartbeat), ApplyOutcome::Applied);
    let record = registry.lookup("survival").unwrap();
    assert_eq!(record.status, ServerStatus::Online);
    assert_eq!(record.last_heartbeat, heartbeat.timestamp);
    assert_eq!(record.owner, "instance-x");
    assert_eq!(registry.find_player(&steve.uuid), Some(("survival".to_string(), steve)));
    assert_eq!(registry.player_count(), 1);
}

#[test]
fn deregistration_keeps_the_sequence_floor() {
    let registry = ServerRegistry::new();
    registry.apply(&announced("lobby-1", 1));
    registry.apply(&event("lobby-1", 2, EventKind::CapacityChanged { max_players: 80 }));
    assert_eq!(
        registry.apply(&event("lobby-1", 3, EventKind::Deregistered)),
        ApplyOutcome::Applied
    );

    assert!(registry.lookup("lobby-1").is_none());
    assert!(registry.is_empty());
    assert_eq!(registry.last_sequence("lobby-1"), 3);

    // A late duplicate must not resurrect the record.
    assert_eq!(registry.apply(&announced("lobby-1", 1)), ApplyOutcome::Ignored);
    assert!(registry.lookup("lobby-1").is_none());

    assert_eq!(registry.apply(&announced("lobby-1", 4)), ApplyOutcome::Applied);
    assert_eq!(registry.len(), 1);
}

#[test]
fn list_by_status_is_sorted() {
    let registry = ServerRegistry::new();
    registry.apply(&announced("survival", 1));
    registry.apply(&announced("lobby-2", 1));
    registry.apply(&announced("lobby-1", 1));
    registry.apply(&event(
        "lobby-2",
        2,
        EventKind::StatusChanged {
            status: ServerStatus::Draining,
        },
    ));

    let online: Vec<String> = registry
        .list_by_status(ServerStatus::Online)
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(online, vec!["lobby-1", "survival"]);
    assert_eq!(registry.list_by_status(ServerStatus::Draining).len(), 1);
    assert!(registry.list_by_status(ServerStatus::Offline).is_empty());
}

#[test]
fn sweep_marks_stale_records_offline_without_touching_sequences() {
    let registry = ServerRegistry::new();
    registry.apply(&announced("lobby-1", 1)); // last_heartbeat 1_001
    registry.apply(&announced("lobby-2", 1));

    let expired = registry.sweep_expired(20_000, 15_000, |id| id == "lobby-2");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].name, "lobby-1");
    assert_eq!(expired[0].status, ServerStatus::Online);
    assert_eq!(registry.lookup("lobby-1").unwrap().status, ServerStatus::Offline);
    assert_eq!(registry.lookup("lobby-2").unwrap().status, ServerStatus::Online);
    assert_eq!(registry.last_sequence("lobby-1"), 1);

    // Already OFFLINE records are not reported again.
    assert!(registry.sweep_expired(30_000, 15_000, |id| id == "lobby-2").is_empty());

    // The owner's next heartbeat still applies and restores the status.
    let heartbeat = event(
        "lobby-1",
        2,
        EventKind::Heartbeat {
            address: address(),
            status: ServerStatus::Online,
            max_players: 100,
            players: vec![],
        },
    );
    assert_eq!(registry.apply(&heartbeat), ApplyOutcome::Applied);
    assert_eq!(registry.lookup("lobby-1").unwrap().status, ServerStatus::Online);
}

#[test]
fn adopt_prefers_the_newer_side() {
    let registry = ServerRegistry::new();
    registry.apply(&announced("lobby-1", 1));
    registry.apply(&event("lobby-1", 2, EventKind::CapacityChanged { max_players: 80 }));

    let stale = ServerRecord::announced("lobby-1", address(), 10, "instance-x", 1, 0);
    assert!(!registry.adopt("lobby-1", Some(stale), 2));
    assert_eq!(registry.lookup("lobby-1").unwrap().max_players, 80);

    let fresh = ServerRecord::announced("lobby-1", address(), 60, "instance-x", 5, 0);
    assert!(registry.adopt("lobby-1", Some(fresh), 5));
    assert_eq!(registry.last_sequence("lobby-1"), 5);

    assert!(registry.adopt("lobby-1", None, 6));
    assert!(registry.lookup("lobby-1").is_none());
    assert_eq!(registry.last_sequence("lobby-1"), 6);
}

#[tokio::test]
async fn bootstrap_loads_records_and_skips_noise() {
    let cache = MemoryCacheStore::new();
    let lobby = ServerRecord::announced("lobby-1", address(), 100, "instance-x", 3, 0);
    let survival = ServerRecord::announced("survival", address(), 20, "instance-y", 7, 0);
    for record in [&lobby, &survival] {
        let value = serde_json::to_string(record).unwrap();
        cache.set(&format!("fleet:server:{}", record.name), &value, None).await.unwrap();
    }
    cache.set("fleet:server:lobby-1:seq", "3", None).await.unwrap();
    cache.set("fleet:server:broken", "{not json", None).await.unwrap();
    cache.set("other:key", "ignored", None).await.unwrap();

    let registry = ServerRegistry::new();
    let count = registry.bootstrap(&cache, "fleet:server").await.unwrap();

    assert_eq!(count, 2);
    assert_eq!(registry.lookup("lobby-1").unwrap(), lobby);
    assert_eq!(registry.last_sequence("survival"), 7);
    assert!(registry.lookup("broken").is_none());
}

#[tokio::test]
async fn bootstrap_never_regresses_newer_local_state() {
    let cache = MemoryCacheStore::new();
    let cached = ServerRecord::announced("lobby-1", address(), 100, "instance-x", 1, 0);
    cache
        .set("fleet:server:lobby-1", &serde_json::to_string(&cached).unwrap(), None)
        .await
        .unwrap();

    let registry = ServerRegistry::new();
    registry.apply(&announced("lobby-1", 1));
    registry.apply(&event("lobby-1", 2, EventKind::CapacityChanged { max_players: 40 }));
    registry.apply(&announced("gone", 1));

    registry.bootstrap(&cache, "fleet:server").await.unwrap();

    assert_eq!(registry.lookup("lobby-1").unwrap().max_players, 40);
    assert_eq!(registry.last_sequence("lobby-1"), 2);
    assert!(registry.lookup("gone").is_none());
}

#[tokio::test]
async fn bootstrap_reports_cache_outage() {
    let cache = MemoryCacheStore::new();
    cache.set_available(false);
    let registry = ServerRegistry::new();
    let err = registry.bootstrap(&cache, "fleet:server").await.unwrap_err();
    assert!(err.is_unavailable());
}
