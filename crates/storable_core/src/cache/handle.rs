//! Record-level cache handles.

use crate::cache::store::{CacheStats, CacheStore};
use crate::error::CoreResult;
use crate::hash::{key_hash, record_hashes};
use crate::key::Key;
use crate::metadata::EntityDescriptor;
use crate::types::MetadataType;
use crate::value::Record;
use std::sync::Arc;
use std::time::SystemTime;

/// The region of one entity in a cache pool.
#[derive(Debug, Clone)]
pub struct RegionCache {
    store: Arc<dyn CacheStore>,
    descriptor: Arc<EntityDescriptor>,
    region: String,
}

impl RegionCache {
    /// The pool backing this region.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Name of the region inside the pool.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.region
    }
}

/// Cache of one entity type, as seen by backends.
///
/// `Disabled` is the null object used for uncached types: it validates
/// keys like the real cache, answers every read as a miss and ignores
/// every mutation, so callers never branch on whether caching is on.
#[derive(Debug, Clone)]
pub enum CacheHandle {
    /// Backed by a cache pool.
    Enabled(RegionCache),
    /// No cache attached.
    Disabled(Arc<EntityDescriptor>),
}

impl CacheHandle {
    /// Handle on the region of `descriptor` in `store`.
    #[must_use]
    pub fn enabled(store: Arc<dyn CacheStore>, descriptor: Arc<EntityDescriptor>) -> Self {
        let region = descriptor.name().to_string();
        Self::Enabled(RegionCache {
            store,
            descriptor,
            region,
        })
    }

    /// Handle on a region of `store` private to `scope`.
    ///
    /// A pool shared by several stores must keep their records apart:
    /// `scope` names the store, and the same entity under two scopes
    /// never sees the other's entries.
    #[must_use]
    pub fn scoped(store: Arc<dyn CacheStore>, descriptor: Arc<EntityDescriptor>, scope: &str) -> Self {
        let region = format!("{scope}/{}", descriptor.name());
        Self::Enabled(RegionCache {
            store,
            descriptor,
            region,
        })
    }

    /// The null-object handle.
    #[must_use]
    pub fn disabled(descriptor: Arc<EntityDescriptor>) -> Self {
        Self::Disabled(descriptor)
    }

    /// Returns true if a pool backs this handle.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// Descriptor of the cached entity.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        match self {
            Self::Enabled(region) => &region.descriptor,
            Self::Disabled(descriptor) => descriptor,
        }
    }

    /// Identifier of the backing pool.
    #[must_use]
    pub fn cache_id(&self) -> Option<&str> {
        match self {
            Self::Enabled(region) => Some(region.store.id()),
            Self::Disabled(_) => None,
        }
    }

    fn region(&self) -> &str {
        match self {
            Self::Enabled(cache) => &cache.region,
            Self::Disabled(descriptor) => descriptor.name(),
        }
    }

    fn is_expired(&self, record: &Record) -> bool {
        let now = SystemTime::now();
        self.descriptor()
            .elements_with(MetadataType::Expires)
            .filter_map(|e| record.get(e.name()).and_then(|v| v.as_timestamp()))
            .any(|expires| expires <= now)
    }

    /// Looks up a record.
    ///
    /// # Errors
    ///
    /// Fails if the key does not fit the entity, whether or not caching
    /// is enabled.
    pub fn get(&self, key: &Key) -> CoreResult<Option<Record>> {
        let hash = key_hash(self.descriptor(), key)?;
        let Self::Enabled(cache) = self else {
            return Ok(None);
        };
        let Some(record) = cache.store.get(self.region(), &hash) else {
            return Ok(None);
        };
        if self.is_expired(&record) {
            cache.store.remove(self.region(), &hash);
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Returns true if a live entry exists for the key.
    pub fn contains(&self, key: &Key) -> CoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Stores a copy of the record under every hash it can be addressed by.
    ///
    /// Records that are already expired, or that carry no complete key,
    /// are not stored.
    pub fn add(&self, record: &Record) {
        let Self::Enabled(cache) = self else {
            return;
        };
        if self.is_expired(record) {
            return;
        }
        let hashes: Vec<_> = record_hashes(self.descriptor(), record)
            .iter()
            .cloned()
            .collect();
        cache.store.put(self.region(), &hashes, record.clone());
    }

    /// Drops the entry for a key. Returns true if one existed.
    pub fn delete(&self, key: &Key) -> CoreResult<bool> {
        Ok(self.remove(key)?.is_some())
    }

    /// Drops and returns the entry for a key.
    pub fn remove(&self, key: &Key) -> CoreResult<Option<Record>> {
        let hash = key_hash(self.descriptor(), key)?;
        Ok(match self {
            Self::Enabled(cache) => cache.store.remove(self.region(), &hash),
            Self::Disabled(_) => None,
        })
    }

    /// Drops every entry addressed by any key of `record`.
    pub fn invalidate(&self, record: &Record) {
        let Self::Enabled(cache) = self else {
            return;
        };
        for hash in record_hashes(self.descriptor(), record).iter() {
            cache.store.remove(self.region(), hash);
        }
    }

    /// Drops every entry of the entity.
    pub fn evict(&self) {
        if let Self::Enabled(cache) = self {
            cache.store.clear_region(self.region());
        }
    }

    /// Number of distinct cached records.
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Enabled(cache) => cache.store.count(self.region()),
            Self::Disabled(_) => 0,
        }
    }

    /// Counters of the backing pool.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        match self {
            Self::Enabled(cache) => cache.store.stats(),
            Self::Disabled(_) => CacheStats::default(),
        }
    }
}
