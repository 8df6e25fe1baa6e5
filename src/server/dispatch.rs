use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::event::ChangeEvent;
use crate::server::protocol::SyncProtocol;
use crate::traits::message_bus::BusMessage;

/// Worker index for `server_id`. Events for one server always land on the
/// same worker, so they are applied in arrival order.
pub fn partition_for(server_id: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    server_id.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

fn spawn_worker(index: usize, protocol: Arc<SyncProtocol>) -> (mpsc::UnboundedSender<ChangeEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = protocol.handle_event(&event).await {
                log::error!(
                    "Worker {} failed to apply {} for {} (seq {}): {}",
                    index,
                    event.body.name(),
                    event.server_id,
                    event.sequence,
                    e
                );
            }
        }
        log::debug!("Apply worker {} stopped", index);
    });
    (tx, handle)
}

/// Decodes bus deliveries and fans them out to `workers` apply tasks keyed by
/// server id. Stops on shutdown; queued events already routed to a worker are
/// still applied before the returned handle completes.
pub fn spawn_consumer(
    protocol: Arc<SyncProtocol>,
    mut deliveries: mpsc::UnboundedReceiver<BusMessage>,
    workers: usize,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let workers = workers.max(1);
    tokio::spawn(async move {
        let (senders, handles): (Vec<_>, Vec<_>) = (0..workers)
            .map(|i| spawn_worker(i, protocol.clone()))
            .unzip();
        log::info!("Consuming fleet events with {} apply worker(s)", workers);

        loop {
            tokio::select! {
                delivery = deliveries.recv() => {
                    let Some(delivery) = delivery else { break };
                    let event = match ChangeEvent::decode(&delivery.payload) {
                        Ok(event) => event,
                        Err(e) => {
                            log::warn!("Dropping event on {}: {}", delivery.topic, e);
                            continue;
                        }
                    };
                    let idx = partition_for(&event.server_id, workers);
                    if senders[idx].send(event).is_err() {
                        log::error!("Apply worker {} is gone", idx);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        drop(senders);
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                log::warn!("Apply worker ended abnormally: {}", e);
            }
        }
        log::info!("Fleet event consumer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_in_range() {
        for id in ["lobby-1", "survival", "minigames-7", ""] {
            let first = partition_for(id, 4);
            assert!(first < 4);
            assert_eq!(first, partition_for(id, 4));
        }
        assert_eq!(partition_for("lobby-1", 1), 0);
        assert_eq!(partition_for("lobby-1", 0), 0);
    }
}
