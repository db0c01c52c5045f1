//! Key hashing.
//!
//! Every key kind of every entity maps into one hash space:
//!
//! ```text
//! sha256( entityName ":" [keyName ":"] value1 ":" value2 ... )
//! ```
//!
//! rendered as 64 lowercase hex characters. Components escape `\` and `:`
//! so distinct tuples never join to the same text. Caches and backends
//! address one logical record by the same hash regardless of which key
//! path produced it.

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::metadata::{ElementDescriptor, EntityDescriptor};
use crate::value::{to_hex, Record, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hash of one key of one record.
pub type KeyHash = String;

/// Every applicable hash of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordHashes {
    /// Surrogate key hash, if declared and present.
    pub surrogate: Option<KeyHash>,
    /// Primary key hash, if declared and complete.
    pub primary: Option<KeyHash>,
    /// Alternate key hashes by key name, for complete keys.
    pub alternates: BTreeMap<String, KeyHash>,
}

impl RecordHashes {
    /// Iterates every hash.
    pub fn iter(&self) -> impl Iterator<Item = &KeyHash> {
        self.surrogate
            .iter()
            .chain(self.primary.iter())
            .chain(self.alternates.values())
    }

    /// Returns true if no key produced a hash.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.surrogate.is_none() && self.primary.is_none() && self.alternates.is_empty()
    }
}

fn escape(component: &str, out: &mut String) {
    for c in component.chars() {
        if c == '\\' || c == ':' {
            out.push('\\');
        }
        out.push(c);
    }
}

fn digest<'a>(
    descriptor: &EntityDescriptor,
    key_name: Option<&str>,
    values: impl IntoIterator<Item = (&'a ElementDescriptor, &'a Value)>,
) -> CoreResult<KeyHash> {
    let mut text = String::new();
    escape(descriptor.name(), &mut text);
    if let Some(name) = key_name {
        text.push(':');
        escape(name, &mut text);
    }
    for (element, value) in values {
        let component = value.key_text().ok_or_else(|| {
            CoreError::invalid_argument(format!(
                "null value for key element '{}' of {}",
                element.name(),
                descriptor.name()
            ))
        })?;
        text.push(':');
        escape(&component, &mut text);
    }
    Ok(to_hex(&Sha256::digest(text.as_bytes())))
}

fn check_arity(
    descriptor: &EntityDescriptor,
    what: &str,
    elements: &[ElementDescriptor],
    values: &[Value],
) -> CoreResult<()> {
    if elements.len() != values.len() {
        return Err(CoreError::invalid_argument(format!(
            "{what} of {} takes {} value(s), got {}",
            descriptor.name(),
            elements.len(),
            values.len()
        )));
    }
    Ok(())
}

/// Hash of a surrogate key value.
///
/// # Errors
///
/// `UnsupportedOperation` if the entity has no surrogate key,
/// `InvalidArgument` if `id` is null.
pub fn surrogate_hash(descriptor: &EntityDescriptor, id: &Value) -> CoreResult<KeyHash> {
    let element = descriptor.surrogate_key().ok_or_else(|| {
        CoreError::unsupported(format!("{} has no surrogate key", descriptor.name()))
    })?;
    digest(descriptor, None, [(element, id)])
}

/// Hash of primary key values, in declared order.
///
/// # Errors
///
/// `UnsupportedOperation` if the entity has no primary key,
/// `InvalidArgument` on an arity mismatch or a null component.
pub fn primary_hash(descriptor: &EntityDescriptor, values: &[Value]) -> CoreResult<KeyHash> {
    let elements = descriptor.primary_key();
    if elements.is_empty() {
        return Err(CoreError::unsupported(format!(
            "{} has no primary key",
            descriptor.name()
        )));
    }
    check_arity(descriptor, "primary key", elements, values)?;
    digest(descriptor, None, elements.iter().zip(values))
}

/// Hash of alternate key values, in declared order.
///
/// The key name is part of the hashed text, so equal values under two
/// alternate keys never collide.
///
/// # Errors
///
/// `InvalidArgument` on an unknown key name, an arity mismatch or a null
/// component.
pub fn alternate_hash(
    descriptor: &EntityDescriptor,
    key_name: &str,
    values: &[Value],
) -> CoreResult<KeyHash> {
    let elements = descriptor.alternate_key(key_name).ok_or_else(|| {
        CoreError::invalid_argument(format!(
            "{} has no alternate key '{key_name}'",
            descriptor.name()
        ))
    })?;
    check_arity(descriptor, &format!("alternate key '{key_name}'"), elements, values)?;
    digest(descriptor, Some(key_name), elements.iter().zip(values))
}

/// Hash of any key.
pub fn key_hash(descriptor: &EntityDescriptor, key: &Key) -> CoreResult<KeyHash> {
    match key {
        Key::Surrogate(id) => surrogate_hash(descriptor, id),
        Key::Primary(values) => primary_hash(descriptor, values),
        Key::Alternate { name, values } => alternate_hash(descriptor, name, values),
    }
}

/// Every hash a record can be addressed by.
///
/// Keys with a null component are skipped.
#[must_use]
pub fn record_hashes(descriptor: &EntityDescriptor, record: &Record) -> RecordHashes {
    let values_of = |elements: &[ElementDescriptor]| -> Vec<Value> {
        elements.iter().map(|e| record.value(e.name())).collect()
    };

    let surrogate = descriptor
        .surrogate_key()
        .and_then(|e| surrogate_hash(descriptor, &record.value(e.name())).ok());
    let primary = (!descriptor.primary_key().is_empty())
        .then(|| primary_hash(descriptor, &values_of(descriptor.primary_key())).ok())
        .flatten();
    let alternates = descriptor
        .alternate_keys()
        .iter()
        .filter_map(|(name, elements)| {
            alternate_hash(descriptor, name, &values_of(elements))
                .ok()
                .map(|hash| (name.clone(), hash))
        })
        .collect();

    RecordHashes {
        surrogate,
        primary,
        alternates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DescriptorCache;
    use crate::test_entities::{Item, Tag};

    fn item() -> std::sync::Arc<EntityDescriptor> {
        DescriptorCache::new().describe::<Item>().unwrap()
    }

    #[test]
    fn hash_is_64_lowercase_hex() {
        let hash = surrogate_hash(&item(), &Value::from("abc")).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn deterministic() {
        let d = item();
        let a = primary_hash(&d, &[Value::from("S-1")]).unwrap();
        let b = primary_hash(&d, &[Value::from("S-1")]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, primary_hash(&d, &[Value::from("S-2")]).unwrap());
    }

    #[test]
    fn key_kinds_do_not_collide() {
        let d = item();
        let value = [Value::from("X")];
        let primary = primary_hash(&d, &value).unwrap();
        let alternate = alternate_hash(&d, "by_code", &value).unwrap();
        assert_ne!(primary, alternate);
    }

    #[test]
    fn integral_widths_hash_alike() {
        let d = item();
        assert_eq!(
            surrogate_hash(&d, &Value::Int(7)).unwrap(),
            surrogate_hash(&d, &Value::Long(7)).unwrap()
        );
    }

    #[test]
    fn escaping_separates_components() {
        let d = DescriptorCache::new().describe::<Tag>().unwrap();
        let joined = primary_hash(&d, &[Value::from("a:b")]).unwrap();
        let escaped = primary_hash(&d, &[Value::from("a\\:b")]).unwrap();
        assert_ne!(joined, escaped);
    }

    #[test]
    fn null_components_are_rejected() {
        let d = item();
        let err = surrogate_hash(&d, &Value::Null).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
        let err = primary_hash(&d, &[Value::Null]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn arity_is_checked() {
        let d = item();
        let err = primary_hash(&d, &[Value::from("a"), Value::from("b")]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
        let err = alternate_hash(&d, "by_code", &[]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn unknown_alternate_key() {
        let err = alternate_hash(&item(), "by_nothing", &[Value::from("a")]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn no_surrogate_key_is_unsupported() {
        let d = DescriptorCache::new().describe::<Tag>().unwrap();
        let err = surrogate_hash(&d, &Value::from("x")).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedOperation { .. }));
    }

    proptest::proptest! {
        #[test]
        fn key_names_cannot_be_spoofed(text in "[a-z:\\\\]{0,12}") {
            let d = item();
            let spoofed = primary_hash(&d, &[Value::from(format!("by_code:{text}"))]).unwrap();
            let alternate = alternate_hash(&d, "by_code", &[Value::from(text.as_str())]).unwrap();
            proptest::prop_assert_ne!(spoofed, alternate);
        }

        #[test]
        fn distinct_values_distinct_hashes(a in "[a-z:\\\\]{0,8}", b in "[a-z:\\\\]{0,8}") {
            proptest::prop_assume!(a != b);
            let d = item();
            let ha = surrogate_hash(&d, &Value::from(a)).unwrap();
            let hb = surrogate_hash(&d, &Value::from(b)).unwrap();
            proptest::prop_assert_ne!(ha, hb);
        }
    }

    #[test]
    fn record_hashes_skip_incomplete_keys() {
        let d = item();
        let record = Record::new().with("id", "i-1").with("sku", "S-1");
        let hashes = record_hashes(&d, &record);
        assert!(hashes.surrogate.is_some());
        assert!(hashes.primary.is_some());
        assert!(hashes.alternates.is_empty());
        assert_eq!(hashes.iter().count(), 2);
        assert_eq!(
            hashes.primary.as_deref(),
            Some(key_hash(&d, &Key::primary(["S-1"])).unwrap().as_str())
        );
    }
}
