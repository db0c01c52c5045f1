//! Dynamic field values and records.

use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A dynamic field value.
///
/// Values travel between beans, records, keys, caches and backends.
/// Temporal data may arrive either as [`Value::Timestamp`] or as an
/// epoch-millisecond [`Value::Long`]; the entity accessor coerces between
/// the two according to the declared element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 8-bit signed integer.
    Byte(i8),
    /// 16-bit signed integer.
    Short(i16),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 text.
    String(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// UUID.
    Uuid(Uuid),
    /// Point in time.
    Timestamp(SystemTime),
    /// Declared enum variant name.
    Enum(String),
    /// Ordered values.
    List(Vec<Value>),
    /// String-keyed values.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Byte(_) => "byte",
            Self::Short(_) => "short",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamp",
            Self::Enum(_) => "enum",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Returns the value as an `i64` if it is integral.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Short(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as an `f64` if it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the text of a string or enum value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a point in time.
    ///
    /// Integral values are read as epoch milliseconds.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<SystemTime> {
        match self {
            Self::Timestamp(t) => Some(*t),
            other => other.as_i64().map(from_epoch_millis),
        }
    }

    /// Stable textual form used for key hashing.
    ///
    /// Returns `None` for [`Value::Null`]. Values that denote the same key
    /// in different shapes (an `Int` and a `Long`, a timestamp and its epoch
    /// milliseconds, a UUID and its hyphenated text) share one form.
    #[must_use]
    pub fn key_text(&self) -> Option<String> {
        let text = match self {
            Self::Null => return None,
            Self::Bool(v) => v.to_string(),
            Self::Byte(_) | Self::Short(_) | Self::Int(_) | Self::Long(_) => {
                self.as_i64().map(|v| v.to_string()).unwrap_or_default()
            }
            Self::Float(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::String(s) | Self::Enum(s) => s.clone(),
            Self::Bytes(b) => to_hex(b),
            Self::Uuid(u) => u.hyphenated().to_string(),
            Self::Timestamp(t) => epoch_millis(*t).to_string(),
            Self::List(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| v.key_text().unwrap_or_else(|| "\u{0}".to_string()))
                    .collect();
                format!("[{}]", parts.join(","))
            }
            Self::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| {
                        format!("{k}={}", v.key_text().unwrap_or_else(|| "\u{0}".to_string()))
                    })
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        };
        Some(text)
    }

    /// Compares two values across compatible shapes.
    ///
    /// Numbers compare numerically, timestamps compare with epoch
    /// milliseconds, text compares with text. Returns `None` when the
    /// values are not comparable.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), b) => b.as_i64().map(|ms| epoch_millis(*a).cmp(&ms)),
            (a, Self::Timestamp(b)) => a.as_i64().map(|ms| ms.cmp(&epoch_millis(*b))),
            (a, b) if a.as_i64().is_some() && b.as_i64().is_some() => {
                Some(a.as_i64()?.cmp(&b.as_i64()?))
            }
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            (Self::Uuid(a), Self::Uuid(b)) => Some(a.cmp(b)),
            (a, b) => match (a.key_text(), b.key_text()) {
                (Some(x), Some(y)) if text_comparable(a) && text_comparable(b) => Some(x.cmp(&y)),
                _ if a == b => Some(Ordering::Equal),
                _ => None,
            },
        }
    }

    /// Equality across compatible shapes (see [`Value::compare`]).
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Converts the value into a typed Rust value.
    pub fn into_typed<T: FromValue>(self) -> CoreResult<T> {
        T::from_value(self)
    }
}

fn text_comparable(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Enum(_) | Value::Uuid(_))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("null"),
        }
    }
}

/// Milliseconds since the Unix epoch (negative before it).
#[must_use]
pub fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_millis()).map_or(i64::MIN, |ms| -ms),
    }
}

/// Point in time from milliseconds since the Unix epoch.
#[must_use]
pub fn from_epoch_millis(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}

/// Current time truncated to millisecond precision.
///
/// Stamped metadata uses this so that the timestamp and epoch-millisecond
/// representations of one instant stay interchangeable.
#[must_use]
pub fn now_millis() -> SystemTime {
    from_epoch_millis(epoch_millis(SystemTime::now()))
}

/// Lowercase hex rendering of bytes.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

value_from!(
    bool => Bool,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    SystemTime => Timestamp,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Long(i64::from(v))
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::Int(i32::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::List(v.into_iter().map(Self::String).collect())
    }
}

/// Conversion from a [`Value`] into a typed Rust value.
///
/// Implemented for the types [`crate::DataType::infer`] understands, and
/// for `Option<T>` of each (`Null` maps to `None`).
pub trait FromValue: Sized {
    /// Converts the value, failing with `InvalidArgument` on a shape mismatch.
    fn from_value(value: Value) -> CoreResult<Self>;
}

fn mismatch(expected: &str, value: &Value) -> CoreError {
    CoreError::invalid_argument(format!("expected {expected}, got {}", value.kind()))
}

impl FromValue for Value {
    fn from_value(value: Value) -> CoreResult<Self> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(mismatch("bool", &other)),
        }
    }
}

macro_rules! integral_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> CoreResult<Self> {
                    let wide = value.as_i64().ok_or_else(|| mismatch(stringify!($ty), &value))?;
                    <$ty>::try_from(wide).map_err(|_| {
                        CoreError::invalid_argument(format!(
                            "{wide} is out of range for {}",
                            stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

integral_from_value!(i8, i16, i32, i64, u16, u32);

impl FromValue for f32 {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Float(v) => Ok(v),
            other => other
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| mismatch("f32", &other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> CoreResult<Self> {
        value.as_f64().ok_or_else(|| mismatch("f64", &value))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::String(s) | Value::Enum(s) => Ok(s),
            Value::Uuid(u) => Ok(u.hyphenated().to_string()),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::String(s) => Uuid::parse_str(&s)
                .map_err(|e| CoreError::invalid_argument(format!("invalid uuid '{s}': {e}"))),
            other => Err(mismatch("uuid", &other)),
        }
    }
}

impl FromValue for SystemTime {
    fn from_value(value: Value) -> CoreResult<Self> {
        value
            .as_timestamp()
            .ok_or_else(|| mismatch("timestamp", &value))
    }
}

impl FromValue for Vec<String> {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::List(items) => items.into_iter().map(String::from_value).collect(),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A persisted record: canonical element name → value.
///
/// Records are the unit exchanged with backends and stored by caches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a field, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the value of a field, treating absent fields as null.
    #[must_use]
    pub fn value(&self, name: &str) -> Value {
        self.fields.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Returns true if the field is absent or null.
    #[must_use]
    pub fn is_null(&self, name: &str) -> bool {
        self.fields.get(name).map_or(true, Value::is_null)
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Builder-style [`Record::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Overlays every field of `other` onto this record.
    pub fn merge(&mut self, other: &Record) {
        for (name, value) in &other.fields {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_text_unifies_integral_widths() {
        assert_eq!(Value::Int(7).key_text(), Value::Long(7).key_text());
        assert_eq!(Value::Short(-3).key_text(), Some("-3".to_string()));
    }

    #[test]
    fn key_text_unifies_timestamp_and_millis() {
        let t = from_epoch_millis(1_700_000_000_123);
        assert_eq!(
            Value::Timestamp(t).key_text(),
            Value::Long(1_700_000_000_123).key_text()
        );
    }

    #[test]
    fn null_has_no_key_text() {
        assert_eq!(Value::Null.key_text(), None);
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn epoch_millis_before_epoch() {
        let t = from_epoch_millis(-1500);
        assert_eq!(epoch_millis(t), -1500);
    }

    #[test]
    fn compare_across_shapes() {
        assert_eq!(Value::Int(3).compare(&Value::Long(5)), Some(Ordering::Less));
        assert_eq!(Value::Double(2.5).compare(&Value::Int(2)), Some(Ordering::Greater));
        assert!(Value::from("a").loosely_equals(&Value::Enum("a".into())));
        assert_eq!(Value::Bool(true).compare(&Value::Int(1)), None);
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
    }

    #[test]
    fn typed_conversions() {
        assert_eq!(Value::Int(5).into_typed::<i64>().unwrap(), 5);
        assert!(Value::Long(i64::MAX).into_typed::<i32>().is_err());
        assert_eq!(Value::Null.into_typed::<Option<String>>().unwrap(), None);
        assert_eq!(
            Value::from("x").into_typed::<Option<String>>().unwrap(),
            Some("x".to_string())
        );
        assert!(Value::from("x").into_typed::<bool>().is_err());
    }

    #[test]
    fn uuid_from_text() {
        let id = Uuid::new_v4();
        let parsed: Uuid = Value::String(id.to_string()).into_typed().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn option_into_value() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(3_i64)), Value::Long(3));
    }

    #[test]
    fn record_merge_overlays() {
        let mut base = Record::new().with("a", 1_i64).with("b", "x");
        base.merge(&Record::new().with("b", "y").with("c", true));
        assert_eq!(base.value("a"), Value::Long(1));
        assert_eq!(base.value("b"), Value::from("y"));
        assert_eq!(base.value("c"), Value::Bool(true));
        assert!(base.is_null("missing"));
    }

    #[test]
    fn hex_rendering() {
        assert_eq!(to_hex(&[0x00, 0xab, 0x10]), "00ab10");
    }
}
