pub mod cache_store;
pub mod message_bus;
