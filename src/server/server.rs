use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::config::{SyncConfig, load_sync_config};
use crate::common::server::ServerRecord;
use crate::server::cluster_heartbeat::{spawn_heartbeat_task, spawn_liveness_task};
use crate::server::dispatch::spawn_consumer;
use crate::server::loader::load_protocol;
use crate::server::protocol::{FleetListener, SyncProtocol};
use crate::traits::message_bus::MessageBus;

/// Running sync core: event consumer, heartbeat and liveness tasks around one
/// protocol instance.
pub struct SyncService {
    protocol: Arc<SyncProtocol>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncService {
    /// Subscribes, bootstraps the registry, then starts the background tasks.
    /// Events delivered while the bootstrap runs are queued and applied after
    /// it, so nothing between the snapshot and the consumer is lost.
    pub async fn start(config: &SyncConfig, protocol: Arc<SyncProtocol>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        protocol.subscribe(tx).await?;
        let count = protocol.bootstrap().await?;
        log::info!("Bootstrapped {} server(s) from cache", count);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            spawn_consumer(protocol.clone(), rx, config.apply_workers, shutdown_rx.clone()),
            spawn_heartbeat_task(
                protocol.clone(),
                Duration::from_millis(config.heartbeat_interval_ms),
                shutdown_rx.clone(),
            ),
            spawn_liveness_task(
                protocol.clone(),
                Duration::from_millis(config.sweep_interval_ms),
                shutdown_rx,
            ),
        ];

        Ok(Self {
            protocol,
            shutdown_tx,
            tasks,
        })
    }

    pub fn protocol(&self) -> &Arc<SyncProtocol> {
        &self.protocol
    }

    /// Stops the background tasks and waits for in-flight applies. With
    /// `deregister` set, every owned server is removed from the fleet before
    /// the bus is closed.
    pub async fn shutdown(self, deregister: bool) {
        self.shutdown_tx.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                log::warn!("Background task ended abnormally: {}", e);
            }
        }
        if deregister {
            for server_id in self.protocol.owned_servers() {
                if let Err(e) = self.protocol.deregister(&server_id).await {
                    log::warn!("Failed to deregister {} on shutdown: {}", server_id, e);
                }
            }
        }
        self.protocol.bus().shutdown().await;
        log::info!("Sync service stopped");
    }
}

/// Logs routing changes; stands in for a proxy when running standalone.
struct LoggingListener;

impl FleetListener for LoggingListener {
    fn server_available(&self, record: &ServerRecord) {
        log::info!("🟢 {} is routable at {}", record.name, record.address);
    }

    fn server_unavailable(&self, server_id: &str) {
        log::info!("🔴 {} is no longer routable", server_id);
    }
}

pub async fn sync_start(config_path: &str) -> Result<()> {
    env_logger::init();
    log::info!("Starting server sync...");
    let config = load_sync_config(config_path)?;
    let protocol = load_protocol(&config, vec![Arc::new(LoggingListener)]).await?;
    let service = SyncService::start(&config, protocol).await?;

    if let Some(local) = &config.local_server {
        let record = service.protocol().register(local).await?;
        log::info!("Announced local server {} at {}", record.name, record.address);
    }

    tokio::signal::ctrl_c().await?;
    log::info!("Shutdown requested");
    service.shutdown(true).await;
    Ok(())
}
