use crate::broker::memory::memory_bus::MemoryBus;
use crate::broker::redis::redis_bus::RedisBus;
use crate::common::error::Result;
use crate::common::event::ChangeEvent;
use crate::traits::message_bus::{BusHandler, MessageBus};

pub enum MessageBusImpl {
    Redis(RedisBus),
    Memory(MemoryBus),
}

impl MessageBus for MessageBusImpl {
    async fn publish(&self, topic: &str, event: &ChangeEvent) -> Result<()> {
        match self {
            MessageBusImpl::Redis(r) => r.publish(topic, event).await,
            MessageBusImpl::Memory(m) => m.publish(topic, event).await,
        }
    }

    async fn subscribe(&self, topic: &str, handler: BusHandler) -> Result<()> {
        match self {
            MessageBusImpl::Redis(r) => r.subscribe(topic, handler).await,
            MessageBusImpl::Memory(m) => m.subscribe(topic, handler).await,
        }
    }

    async fn shutdown(&self) {
        match self {
            MessageBusImpl::Redis(r) => r.shutdown().await,
            MessageBusImpl::Memory(m) => m.shutdown().await,
        }
    }
}
