pub mod redis {
    pub mod redis_bus;
}
pub mod memory {
    pub mod memory_bus;
}
pub mod message_bus_impl;
