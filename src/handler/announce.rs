use crate::common::event::ChangeEvent;
use crate::common::server::{ServerAddress, ServerRecord};
use crate::handler::Transition;

/// Announcements start a fresh lifecycle: whatever the mirror held for this
/// id (players, a locally inferred OFFLINE) is discarded.
pub fn handle_announced(event: &ChangeEvent, address: &ServerAddress, max_players: u32) -> Transition {
    log::info!(
        "Server {} announced at {} by {} (seq {})",
        event.server_id,
        address,
        event.origin,
        event.sequence
    );
    Transition::Upsert(ServerRecord::announced(
        &event.server_id,
        address.clone(),
        max_players,
        &event.origin,
        event.sequence,
        event.timestamp,
    ))
}
