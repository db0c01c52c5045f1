//! Property-based test generators using proptest.
//!
//! Provides strategies for generating key values, records and users
//! that satisfy the fixture types' constraints.

use crate::fixtures::User;
use proptest::prelude::*;
use storable_core::{Record, Value};

/// Strategy for generating valid entity and key names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}")
        .expect("Invalid regex")
        .prop_filter("Name must not be empty", |s| !s.is_empty())
}

/// Strategy for generating text that stresses key escaping.
pub fn key_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z:\\\\]{0,12}").expect("Invalid regex")
}

/// Strategy for generating non-null key component values.
pub fn key_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        key_text_strategy().prop_map(Value::from),
        any::<u128>().prop_map(|bits| Value::from(uuid::Uuid::from_u128(bits))),
    ]
}

/// Strategy for generating composite key value tuples.
pub fn key_values_strategy(max_len: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(key_value_strategy(), 1..=max_len.max(1))
}

/// Strategy for generating flat records with scalar fields.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,10}").expect("Invalid regex"),
        prop_oneof![
            Just(Value::Null),
            any::<i32>().prop_map(Value::from),
            "[a-z ]{0,20}".prop_map(Value::from),
        ],
        0..8,
    )
    .prop_map(|fields| {
        fields
            .into_iter()
            .fold(Record::new(), |record, (name, value)| record.with(name, value))
    })
}

/// Strategy for generating users with distinct-looking handles.
pub fn user_strategy() -> impl Strategy<Value = User> {
    (
        prop::string::string_regex("[a-z][a-z0-9]{2,15}").expect("Invalid regex"),
        0i32..120,
    )
        .prop_map(|(handle, age)| {
            let mut user = User::named(&handle);
            user.age = age;
            user
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn names_are_identifiers(name in name_strategy()) {
            prop_assert!(name.chars().next().unwrap().is_ascii_alphabetic());
        }

        #[test]
        fn key_values_are_never_null(values in key_values_strategy(4)) {
            prop_assert!(!values.is_empty() && values.len() <= 4);
            prop_assert!(values.iter().all(|v| !v.is_null()));
        }

        #[test]
        fn users_have_primary_keys(user in user_strategy()) {
            prop_assert!(user.email.as_deref().unwrap().ends_with("@example.com"));
        }
    }
}
