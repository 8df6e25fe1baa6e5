//! Pure state transitions for each event kind. Nothing here touches the
//! network or the registry's locks; the registry calls `transition` while it
//! holds the entry for `event.server_id`.

pub mod announce;
pub mod deregister;
pub mod heartbeat;
pub mod status;
pub mod update;

use crate::common::event::{ChangeEvent, EventKind};
use crate::common::server::ServerRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Upsert(ServerRecord),
    Remove,
    /// A delta event arrived for a server this mirror does not hold.
    MissingRecord,
}

pub fn transition(current: Option<&ServerRecord>, event: &ChangeEvent) -> Transition {
    match &event.body {
        EventKind::Announced { address, max_players } => {
            announce::handle_announced(event, address, *max_players)
        }
        EventKind::Heartbeat {
            address,
            status,
            max_players,
            players,
        } => heartbeat::handle_heartbeat(current, event, address, *status, *max_players, players),
        EventKind::StatusChanged { status } => status::handle_status_changed(current, event, *status),
        EventKind::PlayerJoined { player } => update::handle_player_joined(current, event, player),
        EventKind::PlayerLeft { uuid } => update::handle_player_left(current, event, uuid),
        EventKind::CapacityChanged { max_players } => {
            update::handle_capacity_changed(current, event, *max_players)
        }
        EventKind::Deregistered => deregister::handle_deregistered(current, event),
    }
}
