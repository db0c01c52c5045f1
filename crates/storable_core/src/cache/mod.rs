//! Read-through / write-through caching.
//!
//! Three layers:
//! - [`CacheStore`]: a shared pool, partitioned into one region per entity
//! - [`CacheHandle`]: one entity's region as records, or the null object
//! - [`EntityCache`]: the typed facade over a handle

mod handle;
mod store;
mod typed;

pub use handle::{CacheHandle, RegionCache};
pub use store::{CacheDefinition, CacheLevel, CacheStats, CacheStore, Eviction, MemoryCacheStore};
pub use typed::EntityCache;
