//! Shared TTL cache store
//!
//! Backs the cache-aside statistics layer, the daily request counter, and
//! the once-per-day alert flags.

mod store;

pub use store::{spawn_cache_cleanup_task, CacheStoreStats, TtlCache};
