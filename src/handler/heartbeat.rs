use crate::common::event::ChangeEvent;
use crate::common::server::{ServerAddress, ServerRecord, ServerStatus, SyncPlayer};
use crate::handler::Transition;

/// Heartbeats carry the full presence state, so they also materialize a
/// server this mirror has never seen.
pub fn handle_heartbeat(
    current: Option<&ServerRecord>,
    event: &ChangeEvent,
    address: &ServerAddress,
    status: ServerStatus,
    max_players: u32,
    players: &[SyncPlayer],
) -> Transition {
    let mut record = match current {
        Some(current) => current.clone(),
        None => {
            log::info!("Registering {} from heartbeat", event.server_id);
            ServerRecord::announced(
                &event.server_id,
                address.clone(),
                max_players,
                &event.origin,
                event.sequence,
                event.timestamp,
            )
        }
    };
    if record.status != status {
        log::info!(
            "Heartbeat moved {} from {:?} to {:?}",
            event.server_id,
            record.status,
            status
        );
    }
    record.address = address.clone();
    record.status = status;
    record.max_players = max_players;
    record.players = players.to_vec();
    record.last_heartbeat = event.timestamp;
    record.owner = event.origin.clone();
    record.sequence = event.sequence;
    Transition::Upsert(record)
}
