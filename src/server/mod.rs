pub mod cluster_heartbeat;
pub mod dispatch;
pub mod loader;
pub mod protocol;
pub mod server;
