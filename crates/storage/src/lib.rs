//! Storage seams for slopestream
//!
//! The durable store and the read-path cache are external services; this
//! crate specifies them at their interfaces. `RideStore` covers
//! partition-key/sort-key point and prefix queries plus a secondary index;
//! `QueryCache` is a key-value cache with per-key expiry. In-memory
//! implementations back the tests; the Redis cache is the production
//! binding for the read path.

pub mod cache;
pub mod redis_cache;
pub mod store;

pub use cache::{MemoryCache, QueryCache};
pub use redis_cache::{RedisCache, RedisCacheConfig};
pub use store::{MemoryRideStore, RideStore};
