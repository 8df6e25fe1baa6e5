use dashmap::DashMap;
use uuid::Uuid;

use crate::common::error::Result;
use crate::common::event::ChangeEvent;
use crate::common::server::{FleetSnapshot, ServerRecord, ServerStatus, SyncPlayer};
use crate::handler::{Transition, transition};
use crate::registry::snapshot::load_snapshot;
use crate::traits::cache_store::CacheStore;

#[derive(Debug, Clone, Default)]
struct Entry {
    record: Option<ServerRecord>,
    // Survives removal of the record so late duplicates stay stale.
    last_sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Duplicate or older than what this mirror already holds.
    Ignored,
    Desync { expected: u64, received: u64 },
}

/// Local mirror of the fleet snapshot.
///
/// Entries live in a sharded map, so an update to one server never blocks
/// lookups of another. No method performs network I/O while holding an
/// entry; `bootstrap` reads the cache first and swaps the result in after.
#[derive(Default)]
pub struct ServerRegistry {
    entries: DashMap<String, Entry>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the mirror with the cache's full snapshot.
    pub async fn bootstrap<C: CacheStore>(&self, cache: &C, prefix: &str) -> Result<usize> {
        let snapshot = load_snapshot(cache, prefix).await?;
        let count = self.replace_with(snapshot);
        log::info!("Registry bootstrapped with {} server(s)", count);
        Ok(count)
    }

    /// Installs `snapshot` as the new state. Servers missing from it are
    /// dropped; no per-server sequence ever moves backwards.
    pub fn replace_with(&self, mut snapshot: FleetSnapshot) -> usize {
        for mut entry in self.entries.iter_mut() {
            if !snapshot.contains_key(entry.key()) {
                entry.record = None;
            }
        }
        for (server_id, record) in snapshot.drain() {
            let mut entry = self.entries.entry(server_id).or_default();
            if record.sequence >= entry.last_sequence {
                entry.last_sequence = record.sequence;
                entry.record = Some(record);
            } else {
                log::debug!(
                    "Keeping newer local state for {} (local seq {}, cache seq {})",
                    record.name,
                    entry.last_sequence,
                    record.sequence
                );
            }
        }
        self.len()
    }

    /// Applies `event` if it is the next sequence for its server.
    pub fn apply(&self, event: &ChangeEvent) -> ApplyOutcome {
        self.apply_inner(event, false)
    }

    /// Like `apply`, but accepts an event past a sequence gap instead of
    /// reporting it.
    pub fn apply_across_gap(&self, event: &ChangeEvent) -> ApplyOutcome {
        self.apply_inner(event, true)
    }

    fn apply_inner(&self, event: &ChangeEvent, allow_gap: bool) -> ApplyOutcome {
        let mut entry = self.entries.entry(event.server_id.clone()).or_default();
        let last = entry.last_sequence;
        let expected = last + 1;
        if event.sequence <= last {
            return ApplyOutcome::Ignored;
        }
        if event.sequence > expected && !allow_gap {
            return ApplyOutcome::Desync {
                expected,
                received: event.sequence,
            };
        }
        match transition(entry.record.as_ref(), event) {
            Transition::Upsert(record) => entry.record = Some(record),
            Transition::Remove => entry.record = None,
            Transition::MissingRecord => {
                if !allow_gap {
                    return ApplyOutcome::Desync {
                        expected,
                        received: event.sequence,
                    };
                }
                log::warn!(
                    "Dropping {} for unknown server {}",
                    event.body.name(),
                    event.server_id
                );
            }
        }
        entry.last_sequence = event.sequence;
        ApplyOutcome::Applied
    }

    /// Installs the result of a targeted cache read. `floor` is the highest
    /// sequence known to be committed for this server; it only matters when
    /// the cache no longer holds a record. Returns whether state changed.
    pub fn adopt(&self, server_id: &str, record: Option<ServerRecord>, floor: u64) -> bool {
        let mut entry = self.entries.entry(server_id.to_string()).or_default();
        match record {
            Some(record) if record.sequence >= entry.last_sequence => {
                entry.last_sequence = record.sequence;
                entry.record = Some(record);
                true
            }
            Some(record) => {
                log::debug!(
                    "Cache copy of {} (seq {}) is older than local seq {}",
                    server_id,
                    record.sequence,
                    entry.last_sequence
                );
                false
            }
            None => {
                let changed = entry.record.is_some() || floor > entry.last_sequence;
                entry.record = None;
                entry.last_sequence = entry.last_sequence.max(floor);
                changed
            }
        }
    }

    /// Owner-side write: installs a record this process just committed.
    pub fn install(&self, record: ServerRecord) -> bool {
        let mut entry = self.entries.entry(record.name.clone()).or_default();
        if record.sequence <= entry.last_sequence {
            return false;
        }
        entry.last_sequence = record.sequence;
        entry.record = Some(record);
        true
    }

    /// Owner-side removal at `sequence`.
    pub fn remove(&self, server_id: &str, sequence: u64) -> bool {
        let mut entry = self.entries.entry(server_id.to_string()).or_default();
        if sequence <= entry.last_sequence {
            return false;
        }
        entry.last_sequence = sequence;
        entry.record.take().is_some()
    }

    pub fn lookup(&self, server_id: &str) -> Option<ServerRecord> {
        self.entries.get(server_id).and_then(|e| e.record.clone())
    }

    pub fn list_by_status(&self, status: ServerStatus) -> Vec<ServerRecord> {
        let mut records: Vec<ServerRecord> = self
            .entries
            .iter()
            .filter_map(|e| e.record.clone())
            .filter(|r| r.status == status)
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        self.entries
            .iter()
            .filter_map(|e| e.record.clone().map(|r| (e.key().clone(), r)))
            .collect()
    }

    pub fn last_sequence(&self, server_id: &str) -> u64 {
        self.entries.get(server_id).map(|e| e.last_sequence).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.record.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find_player(&self, uuid: &Uuid) -> Option<(String, SyncPlayer)> {
        self.entries.iter().find_map(|e| {
            let record = e.record.as_ref()?;
            let player = record.players.iter().find(|p| &p.uuid == uuid)?;
            Some((record.name.clone(), player.clone()))
        })
    }

    pub fn player_count(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|e| e.record.as_ref().map(|r| r.player_count()))
            .sum()
    }

    /// Marks every record whose last heartbeat is older than `timeout_ms`
    /// OFFLINE in this mirror only, except those `skip` selects. Sequences are
    /// left alone so the owner's next event still applies. Returns the marked
    /// records as they were before marking.
    pub fn sweep_expired<F>(&self, now_ms: i64, timeout_ms: i64, skip: F) -> Vec<ServerRecord>
    where
        F: Fn(&str) -> bool,
    {
        let mut expired = Vec::new();
        for mut entry in self.entries.iter_mut() {
            let Some(record) = entry.record.as_mut() else {
                continue;
            };
            if skip(&record.name) {
                continue;
            }
            if record.status != ServerStatus::Offline && record.is_stale(now_ms, timeout_ms) {
                log::warn!(
                    "Server {} missed heartbeats for {}ms, marking OFFLINE locally",
                    record.name,
                    now_ms - record.last_heartbeat
                );
                let before = record.clone();
                record.status = ServerStatus::Offline;
                expired.push(before);
            }
        }
        expired
    }
}
