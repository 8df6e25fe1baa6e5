use crate::common::event::ChangeEvent;
use crate::common::server::ServerRecord;
use crate::handler::Transition;

pub fn handle_deregistered(current: Option<&ServerRecord>, event: &ChangeEvent) -> Transition {
    match current {
        Some(_) => log::info!("Server {} deregistered (seq {})", event.server_id, event.sequence),
        None => log::debug!("Deregistration for unknown server {}", event.server_id),
    }
    Transition::Remove
}
