use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Online,
    Draining,
    Offline,
}

impl ServerStatus {
    fn rank(self) -> u8 {
        match self {
            ServerStatus::Online => 0,
            ServerStatus::Draining => 1,
            ServerStatus::Offline => 2,
        }
    }

    /// Status only moves forward along ONLINE -> DRAINING -> OFFLINE.
    /// OFFLINE -> ONLINE is a re-announcement, not a transition.
    pub fn can_transition_to(self, next: ServerStatus) -> bool {
        next.rank() > self.rank()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SyncPlayer {
    pub uuid: Uuid,
    pub username: String,
}

impl SyncPlayer {
    pub fn new(uuid: Uuid, username: impl Into<String>) -> Self {
        Self {
            uuid,
            username: username.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    pub name: String,
    pub address: ServerAddress,
    pub max_players: u32,
    #[serde(default)]
    pub players: Vec<SyncPlayer>,
    pub status: ServerStatus,
    pub last_heartbeat: i64, // milliseconds since UNIX_EPOCH, owner clock
    pub sequence: u64,
    pub owner: String,
}

impl ServerRecord {
    /// Fresh ONLINE lifecycle with no players.
    pub fn announced(
        name: &str,
        address: ServerAddress,
        max_players: u32,
        owner: &str,
        sequence: u64,
        now_ms: i64,
    ) -> Self {
        Self {
            name: name.to_string(),
            address,
            max_players,
            players: Vec::new(),
            status: ServerStatus::Online,
            last_heartbeat: now_ms,
            sequence,
            owner: owner.to_string(),
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn contains_player(&self, uuid: &Uuid) -> bool {
        self.players.iter().any(|p| &p.uuid == uuid)
    }

    pub fn add_player(&mut self, player: SyncPlayer) {
        self.remove_player(&player.uuid);
        self.players.push(player);
    }

    pub fn remove_player(&mut self, uuid: &Uuid) -> Option<SyncPlayer> {
        let idx = self.players.iter().position(|p| &p.uuid == uuid)?;
        Some(self.players.remove(idx))
    }

    pub fn is_stale(&self, now_ms: i64, timeout_ms: i64) -> bool {
        now_ms - self.last_heartbeat > timeout_ms
    }

    pub fn is_routable(&self) -> bool {
        self.status == ServerStatus::Online
    }
}

/// Server owned by this process, as given by the backend platform.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LocalServer {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub max_players: u32,
}

impl LocalServer {
    pub fn address(&self) -> ServerAddress {
        ServerAddress {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

pub type FleetSnapshot = HashMap<String, ServerRecord>;
