//! Surrogate key generation.

use crate::error::{CoreError, CoreResult};
use crate::metadata::{ElementDescriptor, EntityDescriptor};
use crate::types::DataType;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Produces surrogate key values for new records.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    /// Generates a value for the surrogate key `element` of `descriptor`.
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` for element types the generator cannot
    /// produce, `NotEnoughResource` when a sequence is exhausted.
    fn generate(&self, descriptor: &EntityDescriptor, element: &ElementDescriptor) -> CoreResult<Value>;
}

/// UUID v4 for text and UUID keys, a per-entity sequence for integral keys.
#[derive(Debug, Default)]
pub struct DefaultKeyGenerator {
    sequences: Mutex<HashMap<String, Arc<AtomicI64>>>,
}

impl DefaultKeyGenerator {
    /// Creates a generator whose sequences start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sequence(&self, entity: &str) -> Arc<AtomicI64> {
        Arc::clone(
            self.sequences
                .lock()
                .entry(entity.to_string())
                .or_insert_with(|| Arc::new(AtomicI64::new(0))),
        )
    }

    fn next_in(&self, descriptor: &EntityDescriptor, max: i64) -> CoreResult<i64> {
        let sequence = self.sequence(descriptor.name());
        sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_add(1).filter(|next| *next <= max)
            })
            .map(|previous| previous + 1)
            .map_err(|_| {
                CoreError::not_enough_resource(format!(
                    "key sequence of {} is exhausted",
                    descriptor.name()
                ))
            })
    }
}

impl KeyGenerator for DefaultKeyGenerator {
    fn generate(&self, descriptor: &EntityDescriptor, element: &ElementDescriptor) -> CoreResult<Value> {
        match element.data_type() {
            DataType::String => Ok(Value::String(Uuid::new_v4().to_string())),
            DataType::Uuid => Ok(Value::Uuid(Uuid::new_v4())),
            DataType::Byte => Ok(Value::Byte(
                i8::try_from(self.next_in(descriptor, i64::from(i8::MAX))?).unwrap_or(i8::MAX),
            )),
            DataType::Short => Ok(Value::Short(
                i16::try_from(self.next_in(descriptor, i64::from(i16::MAX))?).unwrap_or(i16::MAX),
            )),
            DataType::Integer => Ok(Value::Int(
                i32::try_from(self.next_in(descriptor, i64::from(i32::MAX))?).unwrap_or(i32::MAX),
            )),
            DataType::Long => Ok(Value::Long(self.next_in(descriptor, i64::MAX)?)),
            other => Err(CoreError::unsupported(format!(
                "cannot generate a {other} surrogate key for {}",
                descriptor.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DescriptorCache, ElementMetadata, EntityMetadata};
    use crate::test_entities::{Counter, Frozen, Item, Stamped};

    fn generate<T: crate::metadata::Entity>(generator: &DefaultKeyGenerator) -> CoreResult<Value> {
        let descriptor = DescriptorCache::new().describe::<T>().unwrap();
        let element = descriptor.surrogate_key().unwrap();
        generator.generate(&descriptor, element)
    }

    #[test]
    fn text_keys_are_uuids() {
        let value = generate::<Item>(&DefaultKeyGenerator::new()).unwrap();
        let text = value.as_str().unwrap();
        assert!(Uuid::parse_str(text).is_ok());
    }

    #[test]
    fn uuid_keys() {
        let value = generate::<Frozen>(&DefaultKeyGenerator::new()).unwrap();
        assert!(matches!(value, Value::Uuid(_)));
    }

    #[test]
    fn integral_keys_count_up_per_entity() {
        let generator = DefaultKeyGenerator::new();
        assert_eq!(generate::<Counter>(&generator).unwrap(), Value::Long(1));
        assert_eq!(generate::<Counter>(&generator).unwrap(), Value::Long(2));
    }

    #[test]
    fn unsupported_key_type() {
        let err = generate::<Stamped>(&DefaultKeyGenerator::new()).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedOperation { .. }));
    }

    #[test]
    fn exhausted_sequence() {
        let metadata = EntityMetadata::new("Tiny")
            .surrogate_key("id")
            .element(ElementMetadata::of::<i8>("id"));
        let descriptor = crate::metadata::EntityDescriptor::build(metadata, "Tiny").unwrap();
        let element = descriptor.surrogate_key().unwrap();
        let generator = DefaultKeyGenerator::new();
        for expected in 1..=i8::MAX {
            assert_eq!(generator.generate(&descriptor, element).unwrap(), Value::Byte(expected));
        }
        let err = generator.generate(&descriptor, element).unwrap_err();
        assert!(matches!(err, CoreError::NotEnoughResource { .. }));
    }
}
