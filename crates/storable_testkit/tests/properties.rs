//! Property tests for key hashing and key uniqueness.

use proptest::prelude::*;
use std::collections::HashSet;
use storable_core::hash::{alternate_hash, primary_hash};
use storable_core::{CoreError, DescriptorCache, EntityDescriptor, Value};
use storable_testkit::prelude::*;

fn account() -> std::sync::Arc<EntityDescriptor> {
    DescriptorCache::new().describe::<Account>().unwrap()
}

fn user() -> std::sync::Arc<EntityDescriptor> {
    DescriptorCache::new().describe::<User>().unwrap()
}

proptest! {
    #[test]
    fn hashes_are_deterministic_hex(a in key_value_strategy(), b in key_value_strategy()) {
        let descriptor = account();
        let values = [a, b];
        let first = primary_hash(&descriptor, &values).unwrap();
        let second = primary_hash(&descriptor, &values).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), 64);
        prop_assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn component_order_matters(a in key_value_strategy(), b in key_value_strategy()) {
        prop_assume!(a.key_text() != b.key_text());
        let descriptor = account();
        let ab = primary_hash(&descriptor, &[a.clone(), b.clone()]).unwrap();
        let ba = primary_hash(&descriptor, &[b, a]).unwrap();
        prop_assert_ne!(ab, ba);
    }

    #[test]
    fn distinct_text_tuples_never_collide(
        x in (key_text_strategy(), key_text_strategy()),
        y in (key_text_strategy(), key_text_strategy()),
    ) {
        prop_assume!(x != y);
        let descriptor = account();
        let hx = primary_hash(&descriptor, &[Value::from(x.0), Value::from(x.1)]).unwrap();
        let hy = primary_hash(&descriptor, &[Value::from(y.0), Value::from(y.1)]).unwrap();
        prop_assert_ne!(hx, hy);
    }

    #[test]
    fn key_kinds_never_share_hashes(text in key_text_strategy()) {
        let descriptor = user();
        let primary = primary_hash(&descriptor, &[Value::from(text.as_str())]).unwrap();
        let alternate = alternate_hash(&descriptor, "by_handle", &[Value::from(text.as_str())]).unwrap();
        prop_assert_ne!(primary, alternate);
    }

    #[test]
    fn null_components_are_rejected(value in key_value_strategy(), null_first in any::<bool>()) {
        let descriptor = account();
        let values = if null_first { [Value::Null, value] } else { [value, Value::Null] };
        let err = primary_hash(&descriptor, &values).unwrap_err();
        prop_assert!(matches!(err, CoreError::InvalidArgument { .. }), "unexpected error: {:?}", err);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn one_stored_user_per_primary_key(users in prop::collection::vec(user_strategy(), 1..12)) {
        let distinct: HashSet<_> = users.iter().map(|u| u.email.clone()).collect();
        let stored = with_manager(|manager| {
            for user in users {
                match manager.create(user) {
                    Ok(_) | Err(CoreError::KeyViolation { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            manager.count::<User>().unwrap()
        });
        prop_assert_eq!(stored, distinct.len() as u64);
    }
}
