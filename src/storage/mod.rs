pub mod redis {
    pub mod redis_client;
    pub mod redis_cache_store;
}
pub mod memory {
    pub mod memory_cache_store;
}
pub mod cache_store_impl;
