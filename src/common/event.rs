use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::error::{Result, SyncError};
use crate::common::server::{ServerAddress, ServerStatus, SyncPlayer};
use crate::common::utils::is_valid_server_id;

pub const SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Announced {
        address: ServerAddress,
        max_players: u32,
    },
    StatusChanged {
        status: ServerStatus,
    },
    Heartbeat {
        address: ServerAddress,
        status: ServerStatus,
        max_players: u32,
        players: Vec<SyncPlayer>,
    },
    PlayerJoined {
        player: SyncPlayer,
    },
    PlayerLeft {
        uuid: Uuid,
    },
    CapacityChanged {
        max_players: u32,
    },
    Deregistered,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Announced { .. } => "ANNOUNCED",
            EventKind::StatusChanged { .. } => "STATUS_CHANGED",
            EventKind::Heartbeat { .. } => "HEARTBEAT",
            EventKind::PlayerJoined { .. } => "PLAYER_JOINED",
            EventKind::PlayerLeft { .. } => "PLAYER_LEFT",
            EventKind::CapacityChanged { .. } => "CAPACITY_CHANGED",
            EventKind::Deregistered => "DEREGISTERED",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub version: u16,
    pub server_id: String,
    pub sequence: u64,
    pub origin: String,
    pub timestamp: i64, // milliseconds since UNIX_EPOCH, origin clock
    pub body: EventKind,
}

impl ChangeEvent {
    pub fn new(server_id: &str, sequence: u64, origin: &str, timestamp: i64, body: EventKind) -> Self {
        Self {
            version: SCHEMA_VERSION,
            server_id: server_id.to_string(),
            sequence,
            origin: origin.to_string(),
            timestamp,
            body,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses and validates a bus payload. Anything that does not decode into
    /// a known schema version with a valid server id and a positive sequence is
    /// rejected as `MalformedEvent`.
    pub fn decode(payload: &str) -> Result<Self> {
        let event: ChangeEvent = serde_json::from_str(payload)
            .map_err(|e| SyncError::MalformedEvent(format!("undecodable payload: {}", e)))?;
        if event.version == 0 || event.version > SCHEMA_VERSION {
            return Err(SyncError::MalformedEvent(format!(
                "unsupported schema version {}",
                event.version
            )));
        }
        if !is_valid_server_id(&event.server_id) {
            return Err(SyncError::MalformedEvent(format!(
                "invalid server id {:?}",
                event.server_id
            )));
        }
        if event.sequence == 0 {
            return Err(SyncError::MalformedEvent(format!(
                "sequence 0 for server {}",
                event.server_id
            )));
        }
        Ok(event)
    }
}
