//! Core type definitions for Storable.

use serde::Deserialize;
use std::any::TypeId;
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// Persisted data type of an element.
///
/// The set is closed: backends map each variant to their native
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// `true` / `false`.
    Boolean,
    /// 8-bit signed integer.
    Byte,
    /// 16-bit signed integer.
    Short,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 text.
    String,
    /// Opaque bytes.
    Bytes,
    /// 128-bit UUID.
    Uuid,
    /// Calendar date (stored as a point in time).
    Date,
    /// Point in time.
    Timestamp,
    /// Declared enum variant, stored by name.
    Enum,
    /// Ordered list of values.
    List,
    /// Unordered set of values.
    Set,
    /// String-keyed map of values.
    Map,
}

impl DataType {
    /// Infers the data type of a Rust type.
    ///
    /// `Option<T>` resolves to the data type of `T`. Returns `None` for
    /// types with no implicit mapping.
    #[must_use]
    pub fn infer<V: 'static>() -> Option<Self> {
        Self::infer_type_id(TypeId::of::<V>())
    }

    fn infer_type_id(id: TypeId) -> Option<Self> {
        macro_rules! infer_table {
            ($($ty:ty => $data_type:expr),* $(,)?) => {
                $(
                    if id == TypeId::of::<$ty>() || id == TypeId::of::<Option<$ty>>() {
                        return Some($data_type);
                    }
                )*
            };
        }

        infer_table!(
            bool => Self::Boolean,
            i8 => Self::Byte,
            i16 => Self::Short,
            i32 => Self::Integer,
            u16 => Self::Integer,
            i64 => Self::Long,
            u32 => Self::Long,
            f32 => Self::Float,
            f64 => Self::Double,
            String => Self::String,
            Vec<u8> => Self::Bytes,
            Uuid => Self::Uuid,
            SystemTime => Self::Timestamp,
            Vec<String> => Self::List,
        );
        None
    }

    /// Returns true for the integral numeric types.
    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(self, Self::Byte | Self::Short | Self::Integer | Self::Long)
    }

    /// Returns true for the temporal types.
    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(self, Self::Date | Self::Timestamp)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Role of an element whose value is maintained by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataType {
    /// Stamped once when the record is created.
    CreatedDate,
    /// Stamped on create and on every mutation.
    LastModifiedDate,
    /// Stamped on create, on every mutation and on touch.
    LastAccessDate,
    /// Expiry instant, derived from the record TTL or the entity TTL.
    Expires,
    /// Per-record time-to-live in seconds, used to compute `Expires`.
    Ttl,
}

impl MetadataType {
    /// Returns true for metadata roles that carry a point in time.
    #[must_use]
    pub const fn is_temporal(self) -> bool {
        !matches!(self, Self::Ttl)
    }
}

/// Consistency a backend is asked to provide for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsistencyLevel {
    /// Reads may observe stale data.
    #[default]
    Eventual,
    /// A writer always observes its own writes.
    ReadYourWrites,
    /// Reads always observe the latest committed write.
    Strong,
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is visible.
    #[default]
    ReadCommitted,
    /// Rows read once keep their value for the transaction.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_primitive_types() {
        assert_eq!(DataType::infer::<bool>(), Some(DataType::Boolean));
        assert_eq!(DataType::infer::<i32>(), Some(DataType::Integer));
        assert_eq!(DataType::infer::<i64>(), Some(DataType::Long));
        assert_eq!(DataType::infer::<String>(), Some(DataType::String));
        assert_eq!(DataType::infer::<SystemTime>(), Some(DataType::Timestamp));
    }

    #[test]
    fn infer_through_option() {
        assert_eq!(DataType::infer::<Option<String>>(), Some(DataType::String));
        assert_eq!(DataType::infer::<Option<Uuid>>(), Some(DataType::Uuid));
    }

    #[test]
    fn infer_unknown_type() {
        struct Opaque;
        assert_eq!(DataType::infer::<Opaque>(), None);
        assert_eq!(DataType::infer::<std::collections::HashSet<u8>>(), None);
    }

    #[test]
    fn temporal_roles() {
        assert!(MetadataType::Expires.is_temporal());
        assert!(!MetadataType::Ttl.is_temporal());
    }
}
