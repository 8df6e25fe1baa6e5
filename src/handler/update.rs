use uuid::Uuid;

use crate::common::event::ChangeEvent;
use crate::common::server::{ServerRecord, SyncPlayer};
use crate::handler::Transition;

pub fn handle_player_joined(
    current: Option<&ServerRecord>,
    event: &ChangeEvent,
    player: &SyncPlayer,
) -> Transition {
    let Some(current) = current else {
        return Transition::MissingRecord;
    };
    log::debug!("Player {} joined {}", player.username, event.server_id);
    let mut record = current.clone();
    record.add_player(player.clone());
    record.sequence = event.sequence;
    Transition::Upsert(record)
}

pub fn handle_player_left(current: Option<&ServerRecord>, event: &ChangeEvent, uuid: &Uuid) -> Transition {
    let Some(current) = current else {
        return Transition::MissingRecord;
    };
    let mut record = current.clone();
    match record.remove_player(uuid) {
        Some(player) => log::debug!("Player {} left {}", player.username, event.server_id),
        None => log::debug!("Player {} was not on {}", uuid, event.server_id),
    }
    record.sequence = event.sequence;
    Transition::Upsert(record)
}

pub fn handle_capacity_changed(
    current: Option<&ServerRecord>,
    event: &ChangeEvent,
    max_players: u32,
) -> Transition {
    let Some(current) = current else {
        return Transition::MissingRecord;
    };
    let mut record = current.clone();
    record.max_players = max_players;
    record.sequence = event.sequence;
    Transition::Upsert(record)
}
