use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::server::ServerStatus;
use crate::common::utils::now_ms;
use crate::server::protocol::SyncProtocol;

/// Heartbeats every owned server that is not OFFLINE. Returns how many
/// heartbeats were committed.
pub async fn send_heartbeats(protocol: &SyncProtocol) -> usize {
    let mut sent = 0;
    for server_id in protocol.owned_servers() {
        let offline = protocol
            .registry()
            .lookup(&server_id)
            .is_none_or(|r| r.status == ServerStatus::Offline);
        if offline {
            continue;
        }
        match protocol.heartbeat(&server_id).await {
            Ok(record) => {
                log::debug!("Heartbeat sent for {} (seq {})", server_id, record.sequence);
                sent += 1;
            }
            Err(e) => log::warn!("Failed to send heartbeat for {}: {}", server_id, e),
        }
    }
    sent
}

pub fn spawn_heartbeat_task(
    protocol: Arc<SyncProtocol>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    send_heartbeats(&protocol).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        log::debug!("Heartbeat task stopped");
    })
}

/// Periodic liveness sweep; see `SyncProtocol::sweep_expired`.
pub fn spawn_liveness_task(
    protocol: Arc<SyncProtocol>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Freshly bootstrapped records get a full interval.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = protocol.sweep_expired(now_ms()).await;
                    if !expired.is_empty() {
                        log::info!("Liveness sweep marked {} server(s) OFFLINE: {:?}", expired.len(), expired);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        log::debug!("Liveness task stopped");
    })
}
