pub mod server_registry;
pub mod snapshot;
