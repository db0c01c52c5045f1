//! Data operations of [`Manager`].
//!
//! Every operation checks, in order: the manager is open, the type is
//! managed, the key and field names fit the descriptor, the type is mutable
//! (for mutations), and the metadata fields are enforced. Only then is a
//! backend chosen and called.

use crate::accessor::EntityAccessor;
use crate::cache::EntityCache;
use crate::error::{CoreError, CoreResult};
use crate::hash::key_hash;
use crate::key::{Criteria, Filter, Key, KeyKind};
use crate::manager::cursor::Cursor;
use crate::manager::enforce::FieldEnforcer;
use crate::manager::Manager;
use crate::metadata::{ElementDescriptor, Entity, EntityDescriptor};
use crate::registry::AccessMode;
use crate::value::{Record, Value};
use std::sync::Arc;

impl Manager {
    fn enforcer<'a>(&'a self, descriptor: &'a EntityDescriptor) -> FieldEnforcer<'a> {
        FieldEnforcer::new(descriptor, self.context.key_generator.as_ref())
    }

    /// Validates a key and coerces its values to the key elements' types.
    fn canonical_key(descriptor: &EntityDescriptor, key: Key) -> CoreResult<Key> {
        key_hash(descriptor, &key)?;
        let accessor = EntityAccessor::new(descriptor);
        let coerce = |elements: &[ElementDescriptor], values: Vec<Value>| -> CoreResult<Vec<Value>> {
            elements
                .iter()
                .zip(values)
                .map(|(element, value)| accessor.coerce(element, value))
                .collect()
        };
        match key {
            Key::Surrogate(value) => {
                let element = descriptor.surrogate_key().ok_or_else(|| {
                    CoreError::unsupported(format!("{} has no surrogate key", descriptor.name()))
                })?;
                Ok(Key::Surrogate(accessor.coerce(element, value)?))
            }
            Key::Primary(values) => Ok(Key::Primary(coerce(descriptor.primary_key(), values)?)),
            Key::Alternate { name, values } => {
                let elements = descriptor.alternate_key(&name).unwrap_or_default();
                let values = coerce(elements, values)?;
                Ok(Key::Alternate { name, values })
            }
        }
    }

    /// The key of `kind` carried by a record.
    fn key_of(descriptor: &EntityDescriptor, kind: KeyKind<'_>, record: &Record) -> CoreResult<Key> {
        let key = Key::of_record(kind, descriptor, record).ok_or_else(|| match kind {
            KeyKind::Surrogate => {
                CoreError::unsupported(format!("{} has no surrogate key", descriptor.name()))
            }
            KeyKind::Primary => {
                CoreError::unsupported(format!("{} has no primary key", descriptor.name()))
            }
            KeyKind::Alternate(name) => CoreError::invalid_argument(format!(
                "{} has no alternate key '{name}'",
                descriptor.name()
            )),
        })?;
        key_hash(descriptor, &key)?;
        Ok(key)
    }

    fn ensure_mutable(descriptor: &EntityDescriptor) -> CoreResult<()> {
        if descriptor.is_mutable() {
            Ok(())
        } else {
            Err(CoreError::constraint_violation(format!(
                "{} is immutable",
                descriptor.name()
            )))
        }
    }

    fn not_found(descriptor: &EntityDescriptor, key: &Key) -> CoreError {
        CoreError::not_found(descriptor.name(), key.to_string())
    }

    fn materialize<T: Entity>(descriptor: &EntityDescriptor, record: &Record) -> CoreResult<T> {
        EntityAccessor::new(descriptor).from_record(record)
    }

    // create / save

    /// Stores a new bean and returns it as stored, with its generated
    /// surrogate key and metadata fields.
    ///
    /// # Errors
    ///
    /// - `KeyViolation` if any key of the bean is taken
    /// - `DataConstraintViolation` if a non-nullable field is null
    /// - `UnsupportedOperation` if the surrogate key cannot be generated
    pub fn create<T: Entity>(&self, bean: T) -> CoreResult<T> {
        self.create_all(vec![bean])?
            .pop()
            .ok_or_else(|| CoreError::illegal_state("create stored no record"))
    }

    /// Stores several new beans, all or none.
    ///
    /// # Errors
    ///
    /// As for [`create`](Self::create); a collision between two beans of
    /// the batch is a `KeyViolation` too.
    pub fn create_all<T: Entity>(&self, beans: Vec<T>) -> CoreResult<Vec<T>> {
        let descriptor = self.managed::<T>()?;
        if beans.is_empty() {
            return Ok(Vec::new());
        }
        let accessor = EntityAccessor::new(&descriptor);
        let enforcer = self.enforcer(&descriptor);
        let records = beans
            .iter()
            .map(|bean| {
                let mut record = accessor.to_record(bean)?;
                enforcer.on_create(&mut record)?;
                Ok(record)
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let target = self.target::<T>(&descriptor, AccessMode::Write)?;
        let source = self.open_source(&target, &descriptor)?;
        let stored = source.source().create(target.txn(), &target.cache, records)?;
        stored.iter().map(|r| accessor.from_record(r)).collect()
    }

    /// Creates the bean, or replaces the stored bean with the same primary
    /// key (or surrogate key, for entities without a primary key).
    ///
    /// A replaced record keeps its surrogate key and creation date.
    ///
    /// # Errors
    ///
    /// `DataConstraintViolation` for immutable types, `KeyViolation` if an
    /// alternate key is taken by another record.
    pub fn save<T: Entity>(&self, bean: T) -> CoreResult<T> {
        let descriptor = self.managed::<T>()?;
        Self::ensure_mutable(&descriptor)?;
        let accessor = EntityAccessor::new(&descriptor);
        let mut record = accessor.to_record(&bean)?;
        if !descriptor.primary_key().is_empty() {
            Self::key_of(&descriptor, KeyKind::Primary, &record)?;
        }
        self.enforcer(&descriptor).on_save(&mut record)?;

        let target = self.target::<T>(&descriptor, AccessMode::Write)?;
        let source = self.open_source(&target, &descriptor)?;
        let stored = source.source().save(target.txn(), &target.cache, record)?;
        accessor.from_record(&stored)
    }

    // fetch / contains

    /// Reads the bean with a surrogate key.
    ///
    /// # Errors
    ///
    /// `NotFound` if no bean has the key, `UnsupportedOperation` if the
    /// type has no surrogate key.
    pub fn fetch_by_id<T: Entity>(&self, id: impl Into<Value>) -> CoreResult<T> {
        self.fetch_key(Key::id(id))
    }

    /// Reads the bean with a primary key.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidArgument` if the values do not fit the key.
    pub fn fetch<T, I, V>(&self, keys: I) -> CoreResult<T>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.fetch_key(Key::primary(keys))
    }

    /// Reads the bean with an alternate key.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidArgument` for an unknown key name.
    pub fn fetch_by_alternate<T, I, V>(&self, name: &str, keys: I) -> CoreResult<T>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.fetch_key(Key::alternate(name, keys))
    }

    /// Reads the bean addressed by any key.
    ///
    /// Outside a transaction the cache is consulted first.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing matches.
    pub fn fetch_key<T: Entity>(&self, key: Key) -> CoreResult<T> {
        let descriptor = self.managed::<T>()?;
        let key = Self::canonical_key(&descriptor, key)?;
        let target = self.target::<T>(&descriptor, AccessMode::Read)?;
        if target.txn.is_none() {
            if let Some(record) = target.cache.get(&key)? {
                return Self::materialize(&descriptor, &record);
            }
        }
        let source = self.open_source(&target, &descriptor)?;
        match source.source().fetch(target.txn(), &target.cache, &key)? {
            Some(record) => Self::materialize(&descriptor, &record),
            None => Err(Self::not_found(&descriptor, &key)),
        }
    }

    /// Returns true if a bean has the surrogate key.
    pub fn contains_id<T: Entity>(&self, id: impl Into<Value>) -> CoreResult<bool> {
        self.contains_key::<T>(Key::id(id))
    }

    /// Returns true if a bean has the primary key.
    pub fn contains<T, I, V>(&self, keys: I) -> CoreResult<bool>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.contains_key::<T>(Key::primary(keys))
    }

    /// Returns true if a bean has the alternate key.
    pub fn contains_alternate<T, I, V>(&self, name: &str, keys: I) -> CoreResult<bool>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.contains_key::<T>(Key::alternate(name, keys))
    }

    /// Returns true if a bean is addressed by the key.
    pub fn contains_key<T: Entity>(&self, key: Key) -> CoreResult<bool> {
        let descriptor = self.managed::<T>()?;
        let key = Self::canonical_key(&descriptor, key)?;
        let target = self.target::<T>(&descriptor, AccessMode::Read)?;
        if target.txn.is_none() && target.cache.contains(&key)? {
            return Ok(true);
        }
        let source = self.open_source(&target, &descriptor)?;
        source.source().contains(target.txn(), &target.cache, &key)
    }

    // update / patch / touch

    /// Replaces the stored bean with the bean's primary key.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no bean has the key
    /// - `UnsupportedOperation` if the type has no primary key
    /// - `DataConstraintViolation` for immutable types
    pub fn update<T: Entity>(&self, bean: T) -> CoreResult<T> {
        self.update_by(bean, KeyKind::Primary)
    }

    /// Replaces the stored bean with the bean's surrogate key.
    ///
    /// # Errors
    ///
    /// As for [`update`](Self::update).
    pub fn update_by_id<T: Entity>(&self, bean: T) -> CoreResult<T> {
        self.update_by(bean, KeyKind::Surrogate)
    }

    /// Replaces the stored bean with the bean's alternate key `name`.
    ///
    /// # Errors
    ///
    /// As for [`update`](Self::update), plus `InvalidArgument` for an
    /// unknown key name.
    pub fn update_by_alternate<T: Entity>(&self, name: &str, bean: T) -> CoreResult<T> {
        self.update_by(bean, KeyKind::Alternate(name))
    }

    fn update_by<T: Entity>(&self, bean: T, kind: KeyKind<'_>) -> CoreResult<T> {
        let descriptor = self.managed::<T>()?;
        let accessor = EntityAccessor::new(&descriptor);
        let mut record = accessor.to_record(&bean)?;
        let key = Self::key_of(&descriptor, kind, &record)?;
        Self::ensure_mutable(&descriptor)?;
        self.enforcer(&descriptor).on_update(&mut record)?;

        let target = self.target::<T>(&descriptor, AccessMode::Write)?;
        let source = self.open_source(&target, &descriptor)?;
        let stored = source
            .source()
            .update(target.txn(), &target.cache, &key, record)?;
        accessor.from_record(&stored)
    }

    /// Changes some fields of the bean with a surrogate key.
    ///
    /// `changes` maps field names (or aliases) to new values.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no bean has the key
    /// - `InvalidArgument` for unknown field names
    /// - `DataConstraintViolation` for immutable types, a changed surrogate
    ///   key, or a null non-nullable field
    pub fn patch_by_id<T: Entity>(&self, id: impl Into<Value>, changes: Record) -> CoreResult<T> {
        self.patch_key(Key::id(id), changes)
    }

    /// Changes some fields of the bean with a primary key.
    ///
    /// # Errors
    ///
    /// As for [`patch_by_id`](Self::patch_by_id).
    pub fn patch<T, I, V>(&self, keys: I, changes: Record) -> CoreResult<T>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.patch_key(Key::primary(keys), changes)
    }

    /// Changes some fields of the bean with an alternate key.
    ///
    /// # Errors
    ///
    /// As for [`patch_by_id`](Self::patch_by_id).
    pub fn patch_by_alternate<T, I, V>(&self, name: &str, keys: I, changes: Record) -> CoreResult<T>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.patch_key(Key::alternate(name, keys), changes)
    }

    /// Changes some fields of the bean addressed by a key.
    ///
    /// # Errors
    ///
    /// As for [`patch_by_id`](Self::patch_by_id).
    pub fn patch_key<T: Entity>(&self, key: Key, changes: Record) -> CoreResult<T> {
        let descriptor = self.managed::<T>()?;
        let key = Self::canonical_key(&descriptor, key)?;
        let mut changes = EntityAccessor::new(&descriptor).canonical_record(changes)?;
        Self::ensure_mutable(&descriptor)?;
        self.enforcer(&descriptor).on_patch(&mut changes)?;

        let target = self.target::<T>(&descriptor, AccessMode::Write)?;
        let source = self.open_source(&target, &descriptor)?;
        let stored = source
            .source()
            .patch(target.txn(), &target.cache, &key, changes)?;
        Self::materialize(&descriptor, &stored)
    }

    /// Stamps the access time and expiry of the bean with a surrogate key.
    ///
    /// # Errors
    ///
    /// `NotFound` if no bean has the key, `DataConstraintViolation` for
    /// immutable types.
    pub fn touch_by_id<T: Entity>(&self, id: impl Into<Value>) -> CoreResult<()> {
        self.touch_key::<T>(Key::id(id))
    }

    /// Stamps the access time and expiry of the bean with a primary key.
    ///
    /// # Errors
    ///
    /// As for [`touch_by_id`](Self::touch_by_id).
    pub fn touch<T, I, V>(&self, keys: I) -> CoreResult<()>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.touch_key::<T>(Key::primary(keys))
    }

    /// Stamps the access time and expiry of the bean with an alternate key.
    ///
    /// # Errors
    ///
    /// As for [`touch_by_id`](Self::touch_by_id).
    pub fn touch_by_alternate<T, I, V>(&self, name: &str, keys: I) -> CoreResult<()>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.touch_key::<T>(Key::alternate(name, keys))
    }

    /// Stamps the access time and expiry of the bean addressed by a key.
    ///
    /// For types tracking neither, this only checks the bean exists.
    ///
    /// # Errors
    ///
    /// As for [`touch_by_id`](Self::touch_by_id).
    pub fn touch_key<T: Entity>(&self, key: Key) -> CoreResult<()> {
        let descriptor = self.managed::<T>()?;
        let key = Self::canonical_key(&descriptor, key)?;
        Self::ensure_mutable(&descriptor)?;
        let changes = self.enforcer(&descriptor).on_touch()?;

        let target = self.target::<T>(&descriptor, AccessMode::Write)?;
        let source = self.open_source(&target, &descriptor)?;
        if changes.is_empty() {
            return if source.source().contains(target.txn(), &target.cache, &key)? {
                Ok(())
            } else {
                Err(Self::not_found(&descriptor, &key))
            };
        }
        source
            .source()
            .patch(target.txn(), &target.cache, &key, changes)?;
        Ok(())
    }

    // delete / remove

    /// Deletes the bean with a surrogate key.
    ///
    /// # Errors
    ///
    /// `NotFound` if no bean has the key.
    pub fn delete_by_id<T: Entity>(&self, id: impl Into<Value>) -> CoreResult<()> {
        self.take::<T>(Key::id(id)).map(|_| ())
    }

    /// Deletes the bean with a primary key.
    ///
    /// # Errors
    ///
    /// `NotFound` if no bean has the key.
    pub fn delete<T, I, V>(&self, keys: I) -> CoreResult<()>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.take::<T>(Key::primary(keys)).map(|_| ())
    }

    /// Deletes the bean with an alternate key.
    ///
    /// # Errors
    ///
    /// `NotFound` if no bean has the key.
    pub fn delete_by_alternate<T, I, V>(&self, name: &str, keys: I) -> CoreResult<()>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.take::<T>(Key::alternate(name, keys)).map(|_| ())
    }

    /// Deletes and returns the bean with a surrogate key.
    ///
    /// # Errors
    ///
    /// `NotFound` if no bean has the key.
    pub fn remove_by_id<T: Entity>(&self, id: impl Into<Value>) -> CoreResult<T> {
        self.remove_key(Key::id(id))
    }

    /// Deletes and returns the bean with a primary key.
    ///
    /// # Errors
    ///
    /// `NotFound` if no bean has the key.
    pub fn remove<T, I, V>(&self, keys: I) -> CoreResult<T>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.remove_key(Key::primary(keys))
    }

    /// Deletes and returns the bean with an alternate key.
    ///
    /// # Errors
    ///
    /// `NotFound` if no bean has the key.
    pub fn remove_by_alternate<T, I, V>(&self, name: &str, keys: I) -> CoreResult<T>
    where
        T: Entity,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.remove_key(Key::alternate(name, keys))
    }

    /// Deletes and returns the bean addressed by a key.
    ///
    /// # Errors
    ///
    /// `NotFound` if no bean has the key.
    pub fn remove_key<T: Entity>(&self, key: Key) -> CoreResult<T> {
        let (descriptor, record) = self.take::<T>(key)?;
        Self::materialize(&descriptor, &record)
    }

    fn take<T: Entity>(&self, key: Key) -> CoreResult<(Arc<EntityDescriptor>, Record)> {
        let descriptor = self.managed::<T>()?;
        let key = Self::canonical_key(&descriptor, key)?;
        let target = self.target::<T>(&descriptor, AccessMode::Write)?;
        let source = self.open_source(&target, &descriptor)?;
        let removed = source.source().delete(target.txn(), &target.cache, &key)?;
        drop(source);
        match removed {
            Some(record) => Ok((descriptor, record)),
            None => Err(Self::not_found(&descriptor, &key)),
        }
    }

    // cursors / counts

    /// Every stored bean.
    pub fn cursor_all<T: Entity>(&self) -> CoreResult<Cursor<T>> {
        self.cursor_filter(Filter::All)
    }

    /// Beans whose fields equal every non-null field of `example`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for unknown field names.
    pub fn cursor_by_example<T: Entity>(&self, example: Record) -> CoreResult<Cursor<T>> {
        self.cursor_filter(Filter::Example(example))
    }

    /// Beans satisfying every predicate of `criteria`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for unknown field names.
    pub fn cursor<T: Entity>(&self, criteria: Criteria) -> CoreResult<Cursor<T>> {
        self.cursor_filter(Filter::Criteria(criteria))
    }

    fn cursor_filter<T: Entity>(&self, filter: Filter) -> CoreResult<Cursor<T>> {
        let descriptor = self.managed::<T>()?;
        let filter = filter.canonicalize(&descriptor)?;
        let target = self.target::<T>(&descriptor, AccessMode::Read)?;
        let source = self.open_source(&target, &descriptor)?;
        let rows = source.source().cursor(target.txn(), &target.cache, &filter)?;
        Ok(Cursor::new(rows, descriptor, source))
    }

    /// Number of stored beans.
    pub fn count<T: Entity>(&self) -> CoreResult<u64> {
        self.count_filter::<T>(Filter::All)
    }

    /// Number of beans matching an example.
    pub fn count_by_example<T: Entity>(&self, example: Record) -> CoreResult<u64> {
        self.count_filter::<T>(Filter::Example(example))
    }

    /// Number of beans satisfying `criteria`.
    pub fn count_matching<T: Entity>(&self, criteria: Criteria) -> CoreResult<u64> {
        self.count_filter::<T>(Filter::Criteria(criteria))
    }

    fn count_filter<T: Entity>(&self, filter: Filter) -> CoreResult<u64> {
        let descriptor = self.managed::<T>()?;
        let filter = filter.canonicalize(&descriptor)?;
        let target = self.target::<T>(&descriptor, AccessMode::Read)?;
        let source = self.open_source(&target, &descriptor)?;
        source.source().count(target.txn(), &target.cache, &filter)
    }

    /// The typed cache `T` reads go through.
    ///
    /// Uncached types get a cache that never holds anything.
    pub fn cache<T: Entity>(&self) -> CoreResult<EntityCache<T>> {
        let descriptor = self.managed::<T>()?;
        let target = self.target::<T>(&descriptor, AccessMode::Read)?;
        Ok(EntityCache::new(target.cache))
    }
}
