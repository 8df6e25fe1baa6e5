use thiserror::Error;

use crate::common::server::ServerStatus;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    /// Sequence gap for a server. Recovered through a targeted resync, never
    /// surfaced to callers as a failure.
    #[error("desync detected for {server_id}: expected sequence {expected}, received {received}")]
    DesyncDetected {
        server_id: String,
        expected: u64,
        received: u64,
    },

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("server id {server_id} is already registered by instance {owner}")]
    DuplicateServerId { server_id: String, owner: String },

    #[error("invalid status transition for {server_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        server_id: String,
        from: ServerStatus,
        to: ServerStatus,
    },

    #[error("invalid server id {0:?}: ids are non-blank and contain no ':'")]
    InvalidServerId(String),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("server {0} is not owned by this instance")]
    NotOwner(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Connection-level failures that put the protocol into degraded mode.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SyncError::CacheUnavailable(_) | SyncError::BusUnavailable(_)
        )
    }
}
