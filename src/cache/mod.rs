//! Key/value backends and the tagged cache built on them.

pub mod backend;
pub mod error;
pub mod keys;
pub mod memory;
pub mod redis_backend;
pub mod service;

pub use backend::KvBackend;
pub use error::CacheError;
pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;
pub use service::{CacheEntry, CacheHealth, CacheOptions, CacheService, CacheStats, HealthStatus, WarmupReport};
