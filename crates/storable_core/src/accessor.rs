//! Field access on beans by declared name or alias.

use crate::error::{CoreError, CoreResult};
use crate::metadata::{ElementDescriptor, Entity, EntityDescriptor};
use crate::types::DataType;
use crate::value::{epoch_millis, from_epoch_millis, Record, Value};
use uuid::Uuid;

/// Reads and writes bean fields through a descriptor.
///
/// Names resolve case-insensitively against element names first, then
/// against element aliases. Values written through the accessor are
/// coerced to the element's data type, so a temporal field accepts either a
/// timestamp or epoch milliseconds regardless of which shape a backend or a
/// criteria produced.
#[derive(Debug, Clone, Copy)]
pub struct EntityAccessor<'d> {
    descriptor: &'d EntityDescriptor,
}

impl<'d> EntityAccessor<'d> {
    /// Creates an accessor for one entity type.
    #[must_use]
    pub fn new(descriptor: &'d EntityDescriptor) -> Self {
        Self { descriptor }
    }

    /// Resolves a field name to its element.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the name matches nothing.
    pub fn resolve(&self, name: &str) -> CoreResult<&'d ElementDescriptor> {
        self.descriptor.element(name).ok_or_else(|| {
            CoreError::invalid_argument(format!(
                "{} has no element named '{name}'",
                self.descriptor.name()
            ))
        })
    }

    /// Reads a field. Fields the bean does not expose read as null.
    pub fn get<T: Entity>(&self, bean: &T, name: &str) -> CoreResult<Value> {
        let element = self.resolve(name)?;
        Ok(bean.get_field(element.name()).unwrap_or(Value::Null))
    }

    /// Writes a field after coercing the value.
    pub fn set<T: Entity>(&self, bean: &mut T, name: &str, value: Value) -> CoreResult<()> {
        let element = self.resolve(name)?;
        let value = self.coerce(element, value)?;
        bean.set_field(element.name(), value)
    }

    /// Every non-null field, virtual elements included.
    pub fn values<T: Entity>(&self, bean: &T) -> CoreResult<Record> {
        let mut record = Record::new();
        for element in self.descriptor.elements() {
            let value = bean.get_field(element.name()).unwrap_or(Value::Null);
            if !value.is_null() {
                record.insert(element.name(), self.coerce(element, value)?);
            }
        }
        Ok(record)
    }

    /// Independent copy of a bean.
    #[must_use]
    pub fn clone_bean<T: Entity>(&self, bean: &T) -> T {
        bean.clone()
    }

    /// Copies fields from `src` into `dst`.
    ///
    /// With `overwrite = false` only fields that are null in `dst` are
    /// filled. Null source fields never overwrite.
    pub fn copy<T: Entity>(&self, src: &T, dst: &mut T, overwrite: bool) -> CoreResult<()> {
        for element in self.descriptor.elements() {
            let value = src.get_field(element.name()).unwrap_or(Value::Null);
            if value.is_null() {
                continue;
            }
            let target_is_null = dst.get_field(element.name()).map_or(true, |v| v.is_null());
            if overwrite || target_is_null {
                dst.set_field(element.name(), self.coerce(element, value)?)?;
            }
        }
        Ok(())
    }

    /// The storage form of a bean: every non-virtual element, nulls included.
    pub fn to_record<T: Entity>(&self, bean: &T) -> CoreResult<Record> {
        let mut record = Record::new();
        for element in self.descriptor.non_virtual_elements() {
            let value = bean.get_field(element.name()).unwrap_or(Value::Null);
            record.insert(element.name(), self.coerce(element, value)?);
        }
        Ok(record)
    }

    /// Materializes a fresh bean from a record.
    pub fn from_record<T: Entity>(&self, record: &Record) -> CoreResult<T> {
        let mut bean = T::default();
        self.apply_record(&mut bean, record)?;
        Ok(bean)
    }

    /// Writes every field of a record into a bean.
    pub fn apply_record<T: Entity>(&self, bean: &mut T, record: &Record) -> CoreResult<()> {
        for (name, value) in record.iter() {
            self.set(bean, name, value.clone())?;
        }
        Ok(())
    }

    /// Rewrites a name → value map to canonical names and coerced values.
    pub fn canonical_record(&self, changes: Record) -> CoreResult<Record> {
        changes
            .into_iter()
            .map(|(name, value)| {
                let element = self.resolve(&name)?;
                Ok((element.name().to_string(), self.coerce(element, value)?))
            })
            .collect()
    }

    /// Coerces a value to an element's data type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the value cannot represent the type.
    pub fn coerce(&self, element: &ElementDescriptor, value: Value) -> CoreResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = |value: &Value| {
            CoreError::invalid_argument(format!(
                "cannot assign {} to {}.{} ({})",
                value.kind(),
                self.descriptor.name(),
                element.name(),
                element.data_type()
            ))
        };
        let narrow = |wide: i64, value: &Value| -> CoreResult<Value> {
            let out_of_range = || mismatch(value);
            Ok(match element.data_type() {
                DataType::Byte => Value::Byte(i8::try_from(wide).map_err(|_| out_of_range())?),
                DataType::Short => Value::Short(i16::try_from(wide).map_err(|_| out_of_range())?),
                DataType::Integer => Value::Int(i32::try_from(wide).map_err(|_| out_of_range())?),
                _ => Value::Long(wide),
            })
        };
        let temporal_role = element.metadata_type().is_some_and(|role| role.is_temporal());

        match element.data_type() {
            DataType::Boolean => match value {
                Value::Bool(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            DataType::Byte | DataType::Short | DataType::Integer | DataType::Long => match &value {
                Value::Timestamp(t) if temporal_role && element.data_type() == DataType::Long => {
                    Ok(Value::Long(epoch_millis(*t)))
                }
                other => match other.as_i64() {
                    Some(wide) => narrow(wide, other),
                    None => Err(mismatch(other)),
                },
            },
            DataType::Float => match value {
                Value::Float(_) => Ok(value),
                other => other
                    .as_f64()
                    .map(|v| Value::Float(v as f32))
                    .ok_or_else(|| mismatch(&other)),
            },
            DataType::Double => value
                .as_f64()
                .map(Value::Double)
                .ok_or_else(|| mismatch(&value)),
            DataType::String => match value {
                Value::String(_) => Ok(value),
                Value::Enum(s) => Ok(Value::String(s)),
                Value::Uuid(u) => Ok(Value::String(u.hyphenated().to_string())),
                other => Err(mismatch(&other)),
            },
            DataType::Bytes => match value {
                Value::Bytes(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            DataType::Uuid => match value {
                Value::Uuid(_) => Ok(value),
                Value::String(s) => Uuid::parse_str(&s).map(Value::Uuid).map_err(|e| {
                    CoreError::invalid_argument(format!(
                        "invalid uuid '{s}' for {}.{}: {e}",
                        self.descriptor.name(),
                        element.name()
                    ))
                }),
                other => Err(mismatch(&other)),
            },
            DataType::Date | DataType::Timestamp => match value {
                Value::Timestamp(_) => Ok(value),
                other => other
                    .as_i64()
                    .map(|ms| Value::Timestamp(from_epoch_millis(ms)))
                    .ok_or_else(|| mismatch(&other)),
            },
            DataType::Enum => match value {
                Value::Enum(_) => Ok(value),
                Value::String(s) => Ok(Value::Enum(s)),
                other => Err(mismatch(&other)),
            },
            DataType::List | DataType::Set => match value {
                Value::List(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            DataType::Map => match value {
                Value::Map(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
        }
    }
}
