#![allow(clippy::async_fn_in_trait)]
pub mod broker;
pub mod common;
pub mod handler;
pub mod registry;
pub mod server;
pub mod storage;
pub mod traits;

pub use server::server::{SyncService, sync_start};
