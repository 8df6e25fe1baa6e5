use std::sync::Arc;

use crate::common::error::Result;
use crate::common::event::ChangeEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

pub type BusHandler = Arc<dyn Fn(BusMessage) + Send + Sync>;

/// Publish/subscribe transport. Delivery is at-least-once and ordered only per
/// topic and publisher connection.
#[trait_variant::make(MessageBus: Send)]
pub trait UnsendMessageBus {
    async fn publish(&self, topic: &str, event: &ChangeEvent) -> Result<()>;
    /// Registered handlers survive reconnects.
    async fn subscribe(&self, topic: &str, handler: BusHandler) -> Result<()>;
    async fn shutdown(&self);
}
