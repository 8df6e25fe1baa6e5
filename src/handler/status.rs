use crate::common::event::ChangeEvent;
use crate::common::server::{ServerRecord, ServerStatus};
use crate::handler::Transition;

pub fn handle_status_changed(
    current: Option<&ServerRecord>,
    event: &ChangeEvent,
    status: ServerStatus,
) -> Transition {
    let Some(current) = current else {
        return Transition::MissingRecord;
    };
    log::info!(
        "Server {} status {:?} -> {:?} (seq {})",
        event.server_id,
        current.status,
        status,
        event.sequence
    );
    let mut record = current.clone();
    record.status = status;
    record.sequence = event.sequence;
    Transition::Upsert(record)
}
