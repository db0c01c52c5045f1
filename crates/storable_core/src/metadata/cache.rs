//! Memoized descriptors, one per entity type.

use crate::error::CoreResult;
use crate::metadata::descriptor::EntityDescriptor;
use crate::metadata::entity::Entity;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Concurrent memo of entity descriptors keyed by type identity.
///
/// Owned by the registry and shared with every manager it hands out.
/// Concurrent first builds of one type may both run `metadata()`; the first
/// insert wins and every caller receives the stored instance.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    descriptors: RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>,
}

impl DescriptorCache {
    /// Creates an empty memo.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptor of `T`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntityType` if the metadata of `T` is malformed.
    /// Failed builds are not memoized.
    pub fn describe<T: Entity>(&self) -> CoreResult<Arc<EntityDescriptor>> {
        let id = TypeId::of::<T>();
        if let Some(descriptor) = self.descriptors.read().get(&id) {
            return Ok(Arc::clone(descriptor));
        }

        // Build outside the lock; metadata() is user code.
        let built = Arc::new(EntityDescriptor::build(
            T::metadata(),
            std::any::type_name::<T>(),
        )?);
        let mut descriptors = self.descriptors.write();
        Ok(Arc::clone(descriptors.entry(id).or_insert(built)))
    }

    /// Returns the memoized descriptor of a type, without building it.
    #[must_use]
    pub fn get(&self, id: TypeId) -> Option<Arc<EntityDescriptor>> {
        self.descriptors.read().get(&id).cloned()
    }

    /// Returns true if a descriptor for `T` has been built.
    #[must_use]
    pub fn contains<T: Entity>(&self) -> bool {
        self.descriptors.read().contains_key(&TypeId::of::<T>())
    }

    /// Number of memoized descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    /// Returns true if nothing has been memoized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }

    /// Drops every memoized descriptor.
    pub fn clear(&self) {
        self.descriptors.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_entities::{Tag, Unmarked};
    use std::thread;

    #[test]
    fn describe_memoizes_one_instance() {
        let cache = DescriptorCache::new();
        let first = cache.describe::<Tag>().unwrap();
        let second = cache.describe::<Tag>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_first_builds_agree() {
        let cache = Arc::new(DescriptorCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.describe::<Tag>().unwrap())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for descriptor in &results {
            assert_eq!(**descriptor, *results[0]);
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failures_are_not_memoized() {
        let cache = DescriptorCache::new();
        assert!(cache.describe::<Unmarked>().is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_resets() {
        let cache = DescriptorCache::new();
        cache.describe::<Tag>().unwrap();
        assert!(cache.contains::<Tag>());
        cache.clear();
        assert!(!cache.contains::<Tag>());
        assert!(cache.get(TypeId::of::<Tag>()).is_none());
    }
}
