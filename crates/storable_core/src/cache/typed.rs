//! Typed cache facade.

use crate::accessor::EntityAccessor;
use crate::cache::handle::CacheHandle;
use crate::cache::store::CacheStats;
use crate::error::CoreResult;
use crate::key::Key;
use crate::metadata::{Entity, EntityDescriptor};
use crate::value::{Record, Value};
use std::marker::PhantomData;
use std::sync::Arc;

/// Cache of one entity type, in terms of beans.
///
/// Stores a snapshot of every bean it is given and materializes a fresh
/// bean on every read, so neither the caller's bean nor a returned bean can
/// change what the cache holds.
///
/// # Example
///
/// ```rust,ignore
/// let users = manager.cache::<User>()?;
/// users.add(&user)?;
/// let cached = users.get_by_id(user.id.clone())?;
/// ```
#[derive(Debug, Clone)]
pub struct EntityCache<T: Entity> {
    handle: CacheHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> EntityCache<T> {
    /// Wraps a record-level handle.
    #[must_use]
    pub fn new(handle: CacheHandle) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    /// The record-level handle.
    #[must_use]
    pub fn handle(&self) -> &CacheHandle {
        &self.handle
    }

    fn descriptor(&self) -> &Arc<EntityDescriptor> {
        self.handle.descriptor()
    }

    fn materialize(&self, record: Option<Record>) -> CoreResult<Option<T>> {
        record
            .map(|r| EntityAccessor::new(self.descriptor()).from_record(&r))
            .transpose()
    }

    fn record_of(&self, bean: &T) -> CoreResult<Record> {
        EntityAccessor::new(self.descriptor()).to_record(bean)
    }

    /// Looks up a bean by surrogate key.
    pub fn get_by_id(&self, id: impl Into<Value>) -> CoreResult<Option<T>> {
        self.get_key(&Key::id(id))
    }

    /// Looks up a bean by primary key.
    pub fn get<I, V>(&self, keys: I) -> CoreResult<Option<T>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.get_key(&Key::primary(keys))
    }

    /// Looks up a bean by alternate key.
    pub fn get_by_alternate<I, V>(&self, name: &str, keys: I) -> CoreResult<Option<T>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.get_key(&Key::alternate(name, keys))
    }

    /// Looks up a bean by any key.
    pub fn get_key(&self, key: &Key) -> CoreResult<Option<T>> {
        self.materialize(self.handle.get(key)?)
    }

    /// Returns true if the surrogate key is cached.
    pub fn contains_id(&self, id: impl Into<Value>) -> CoreResult<bool> {
        self.handle.contains(&Key::id(id))
    }

    /// Returns true if the primary key is cached.
    pub fn contains<I, V>(&self, keys: I) -> CoreResult<bool>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.handle.contains(&Key::primary(keys))
    }

    /// Returns true if the alternate key is cached.
    pub fn contains_alternate<I, V>(&self, name: &str, keys: I) -> CoreResult<bool>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.handle.contains(&Key::alternate(name, keys))
    }

    /// Caches a snapshot of the bean under all of its keys.
    pub fn add(&self, bean: &T) -> CoreResult<()> {
        let record = self.record_of(bean)?;
        self.handle.add(&record);
        Ok(())
    }

    /// Drops the entry for a surrogate key. Returns true if one existed.
    pub fn delete_by_id(&self, id: impl Into<Value>) -> CoreResult<bool> {
        self.handle.delete(&Key::id(id))
    }

    /// Drops the entry for a primary key. Returns true if one existed.
    pub fn delete<I, V>(&self, keys: I) -> CoreResult<bool>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.handle.delete(&Key::primary(keys))
    }

    /// Drops the entry for an alternate key. Returns true if one existed.
    pub fn delete_by_alternate<I, V>(&self, name: &str, keys: I) -> CoreResult<bool>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.handle.delete(&Key::alternate(name, keys))
    }

    /// Drops and returns the bean cached for a surrogate key.
    pub fn remove_by_id(&self, id: impl Into<Value>) -> CoreResult<Option<T>> {
        let record = self.handle.remove(&Key::id(id))?;
        self.materialize(record)
    }

    /// Drops and returns the bean cached for a primary key.
    pub fn remove<I, V>(&self, keys: I) -> CoreResult<Option<T>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let record = self.handle.remove(&Key::primary(keys))?;
        self.materialize(record)
    }

    /// Drops and returns the bean cached for an alternate key.
    pub fn remove_by_alternate<I, V>(&self, name: &str, keys: I) -> CoreResult<Option<T>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let record = self.handle.remove(&Key::alternate(name, keys))?;
        self.materialize(record)
    }

    /// Drops every entry addressed by any key of the bean.
    pub fn invalidate(&self, bean: &T) -> CoreResult<()> {
        let record = self.record_of(bean)?;
        self.handle.invalidate(&record);
        Ok(())
    }

    /// Drops every cached bean of the type.
    pub fn evict(&self) {
        self.handle.evict();
    }

    /// Number of distinct cached beans.
    #[must_use]
    pub fn count(&self) -> usize {
        self.handle.count()
    }

    /// Counters of the backing pool.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.handle.stats()
    }
}
