use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::common::error::{Result, SyncError};
use crate::common::event::ChangeEvent;
use crate::traits::message_bus::{BusHandler, BusMessage, MessageBus};

/// Shared in-process transport. Every `MemoryBus` created from the same hub
/// sees the same topics.
#[derive(Clone, Default)]
pub struct MemoryHub {
    topics: Arc<Mutex<HashMap<String, Vec<(u64, BusHandler)>>>>,
    next_client: Arc<AtomicU64>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> MemoryBus {
        MemoryBus {
            hub: self.clone(),
            id: self.next_client.fetch_add(1, Ordering::SeqCst),
            connected: Arc::new(AtomicBool::new(true)),
            registered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn attach(&self, client: u64, topic: &str, handler: BusHandler) {
        let mut topics = self.topics.lock().await;
        topics.entry(topic.to_string()).or_default().push((client, handler));
    }

    async fn detach_all(&self, client: u64) {
        let mut topics = self.topics.lock().await;
        for handlers in topics.values_mut() {
            handlers.retain(|(id, _)| *id != client);
        }
    }

    async fn deliver(&self, topic: &str, payload: String) -> usize {
        let handlers: Vec<BusHandler> = {
            let topics = self.topics.lock().await;
            topics
                .get(topic)
                .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(BusMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            });
        }
        handlers.len()
    }

    /// Delivers a raw payload as if a remote publisher had sent it.
    pub async fn inject(&self, topic: &str, payload: &str) -> usize {
        self.deliver(topic, payload.to_string()).await
    }
}

pub struct MemoryBus {
    hub: MemoryHub,
    id: u64,
    connected: Arc<AtomicBool>,
    registered: Arc<Mutex<Vec<(String, BusHandler)>>>,
}

impl MemoryBus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Simulates a dropped connection: publishes fail and nothing is delivered
    /// until `reconnect`.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.hub.detach_all(self.id).await;
        log::warn!("Memory bus client {} disconnected", self.id);
    }

    /// Restores the connection and re-subscribes every registered topic.
    pub async fn reconnect(&self) {
        let registered = self.registered.lock().await;
        for (topic, handler) in registered.iter() {
            self.hub.attach(self.id, topic, handler.clone()).await;
        }
        self.connected.store(true, Ordering::SeqCst);
        log::info!(
            "Memory bus client {} reconnected, re-subscribed {} topic(s)",
            self.id,
            registered.len()
        );
    }
}

impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, event: &ChangeEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(SyncError::BusUnavailable(format!(
                "memory bus client {} is disconnected",
                self.id
            )));
        }
        let payload = event.encode()?;
        let receivers = self.hub.deliver(topic, payload).await;
        log::debug!("Published {} to {} ({} receivers)", event.body.name(), topic, receivers);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: BusHandler) -> Result<()> {
        let mut registered = self.registered.lock().await;
        registered.push((topic.to_string(), handler.clone()));
        if self.is_connected() {
            self.hub.attach(self.id, topic, handler).await;
        }
        log::debug!("Memory bus client {} subscribed to {}", self.id, topic);
        Ok(())
    }

    async fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.hub.detach_all(self.id).await;
        self.registered.lock().await.clear();
    }
}
