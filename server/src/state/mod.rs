pub mod cleanup;
pub mod ttl_cache;
