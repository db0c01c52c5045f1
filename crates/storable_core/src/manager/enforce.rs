//! Metadata field stamping and not-null checks.

use crate::accessor::EntityAccessor;
use crate::error::{CoreError, CoreResult};
use crate::manager::keygen::KeyGenerator;
use crate::metadata::EntityDescriptor;
use crate::types::MetadataType;
use crate::value::{now_millis, Record, Value};
use std::time::{Duration, SystemTime};

/// Applies the metadata roles of one entity to outgoing records.
///
/// All stamps of one enforcer share a single clock reading, so a created
/// record has equal created, modified and access times.
pub(crate) struct FieldEnforcer<'a> {
    descriptor: &'a EntityDescriptor,
    key_generator: &'a dyn KeyGenerator,
    now: SystemTime,
}

impl<'a> FieldEnforcer<'a> {
    pub(crate) fn new(descriptor: &'a EntityDescriptor, key_generator: &'a dyn KeyGenerator) -> Self {
        Self {
            descriptor,
            key_generator,
            now: now_millis(),
        }
    }

    /// A new record: surrogate key, every timestamp, expiry.
    pub(crate) fn on_create(&self, record: &mut Record) -> CoreResult<()> {
        self.generate_surrogate(record)?;
        self.stamp(record, MetadataType::CreatedDate, true)?;
        self.stamp(record, MetadataType::LastModifiedDate, true)?;
        self.stamp(record, MetadataType::LastAccessDate, true)?;
        self.stamp_expiry(record)?;
        self.check_not_null(record, false)
    }

    /// A record that may or may not exist yet. A creation date already set
    /// is kept.
    pub(crate) fn on_save(&self, record: &mut Record) -> CoreResult<()> {
        self.generate_surrogate(record)?;
        self.stamp(record, MetadataType::CreatedDate, false)?;
        self.stamp(record, MetadataType::LastModifiedDate, true)?;
        self.stamp(record, MetadataType::LastAccessDate, true)?;
        self.stamp_expiry(record)?;
        self.check_not_null(record, false)
    }

    /// A full replacement of a stored record.
    pub(crate) fn on_update(&self, record: &mut Record) -> CoreResult<()> {
        self.stamp(record, MetadataType::LastModifiedDate, true)?;
        self.stamp(record, MetadataType::LastAccessDate, true)?;
        self.stamp_expiry(record)?;
        self.check_not_null(record, false)
    }

    /// A partial update. The surrogate key cannot be patched.
    pub(crate) fn on_patch(&self, changes: &mut Record) -> CoreResult<()> {
        if let Some(surrogate) = self.descriptor.surrogate_key() {
            if changes.get(surrogate.name()).is_some() {
                return Err(CoreError::constraint_violation(format!(
                    "surrogate key {}.{} cannot be changed",
                    self.descriptor.name(),
                    surrogate.name()
                )));
            }
        }
        self.stamp(changes, MetadataType::LastModifiedDate, true)?;
        self.stamp(changes, MetadataType::LastAccessDate, true)?;
        self.stamp_expiry(changes)?;
        self.check_not_null(changes, true)
    }

    /// The changes a touch applies. Empty when the entity tracks neither
    /// access nor expiry.
    pub(crate) fn on_touch(&self) -> CoreResult<Record> {
        let mut changes = Record::new();
        self.stamp(&mut changes, MetadataType::LastAccessDate, true)?;
        self.stamp_expiry(&mut changes)?;
        Ok(changes)
    }

    fn generate_surrogate(&self, record: &mut Record) -> CoreResult<()> {
        let Some(element) = self.descriptor.surrogate_key() else {
            return Ok(());
        };
        if record.is_null(element.name()) {
            let value = self.key_generator.generate(self.descriptor, element)?;
            let value = EntityAccessor::new(self.descriptor).coerce(element, value)?;
            record.insert(element.name(), value);
        }
        Ok(())
    }

    fn stamp(&self, record: &mut Record, role: MetadataType, overwrite: bool) -> CoreResult<()> {
        self.stamp_with(record, role, self.now, overwrite)
    }

    fn stamp_with(&self, record: &mut Record, role: MetadataType, at: SystemTime, overwrite: bool) -> CoreResult<()> {
        let accessor = EntityAccessor::new(self.descriptor);
        for element in self.descriptor.elements_with(role) {
            if element.is_virtual() || (!overwrite && !record.is_null(element.name())) {
                continue;
            }
            record.insert(element.name(), accessor.coerce(element, Value::Timestamp(at))?);
        }
        Ok(())
    }

    /// Expiry is `now + ttl`, the ttl taken from the record's own `Ttl`
    /// element (seconds) or else from the entity default. Without either,
    /// expiry is left alone.
    fn stamp_expiry(&self, record: &mut Record) -> CoreResult<()> {
        let Some(ttl) = self.ttl_of(record)? else {
            return Ok(());
        };
        let expires = self.now.checked_add(ttl).ok_or_else(|| {
            CoreError::constraint_violation(format!(
                "ttl of {} is out of range: {}s",
                self.descriptor.name(),
                ttl.as_secs()
            ))
        })?;
        self.stamp_with(record, MetadataType::Expires, expires, true)
    }

    fn ttl_of(&self, record: &Record) -> CoreResult<Option<Duration>> {
        let own = self
            .descriptor
            .elements_with(MetadataType::Ttl)
            .find_map(|e| record.get(e.name()).filter(|v| !v.is_null()));
        match own {
            Some(value) => {
                let seconds = value.as_i64().ok_or_else(|| {
                    CoreError::constraint_violation(format!(
                        "ttl of {} must be integral, got {}",
                        self.descriptor.name(),
                        value.kind()
                    ))
                })?;
                let seconds = u64::try_from(seconds).map_err(|_| {
                    CoreError::constraint_violation(format!(
                        "ttl of {} must not be negative",
                        self.descriptor.name()
                    ))
                })?;
                Ok(Some(Duration::from_secs(seconds)))
            }
            None => Ok(self.descriptor.ttl()),
        }
    }

    /// With `partial`, only elements present in the record are checked.
    fn check_not_null(&self, record: &Record, partial: bool) -> CoreResult<()> {
        for element in self.descriptor.non_virtual_elements() {
            if element.is_nullable() || (partial && record.get(element.name()).is_none()) {
                continue;
            }
            if record.is_null(element.name()) {
                return Err(CoreError::constraint_violation(format!(
                    "{}.{} must not be null",
                    self.descriptor.name(),
                    element.name()
                )));
            }
        }
        Ok(())
    }
}
