pub mod config;
pub mod error;
pub mod event;
pub mod server;
pub mod utils;
