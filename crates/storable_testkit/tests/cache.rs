//! Read-through / write-through caching seen from the manager.

use storable_core::{CoreError, Record};
use storable_testkit::prelude::*;

#[test]
fn cached_beans_are_snapshots() {
    let registry = memory_registry();
    let manager = registry.manager();
    let users = manager.cache::<User>().unwrap();

    let mut ada = manager.create(User::named("ada")).unwrap();
    assert_eq!(users.count(), 1);

    ada.name = Some("changed after create".into());
    let cached = users.get(["ada@example.com"]).unwrap().unwrap();
    assert_eq!(cached.name.as_deref(), Some("ada"));

    let mut fetched: User = manager.fetch(["ada@example.com"]).unwrap();
    fetched.age = 99;
    let again: User = manager.fetch(["ada@example.com"]).unwrap();
    assert_eq!(again.age, 30);
}

#[test]
fn every_key_finds_the_same_entry() {
    let registry = memory_registry();
    let manager = registry.manager();
    let users = manager.cache::<User>().unwrap();
    let ada = manager.create(User::named("ada")).unwrap();

    assert!(users.contains_id(ada.id.clone()).unwrap());
    assert!(users.contains(["ada@example.com"]).unwrap());
    assert!(users.contains_alternate("by_handle", ["ada"]).unwrap());
    assert_eq!(users.count(), 1);

    assert!(users.delete_by_alternate("by_handle", ["ada"]).unwrap());
    assert!(!users.contains_id(ada.id.clone()).unwrap());
    assert_eq!(users.count(), 0);
}

#[test]
fn misses_populate_and_hits_skip_the_backend() {
    let registry = memory_registry();
    let manager = registry.manager();
    let users = manager.cache::<User>().unwrap();
    manager.create(User::named("ada")).unwrap();
    users.evict();
    let before = users.stats();

    let _: User = manager.fetch(["ada@example.com"]).unwrap();
    let _: User = manager.fetch(["ada@example.com"]).unwrap();
    let after = users.stats();

    assert_eq!(after.misses - before.misses, 1);
    assert_eq!(after.hits - before.hits, 1);
    assert_eq!(users.count(), 1);
}

#[test]
fn writes_keep_the_cache_current() {
    let registry = memory_registry();
    let manager = registry.manager();
    let users = manager.cache::<User>().unwrap();
    manager.create(User::named("ada")).unwrap();

    manager
        .patch::<User, _, _>(["ada@example.com"], Record::new().with("age", 31))
        .unwrap();
    assert_eq!(users.get(["ada@example.com"]).unwrap().unwrap().age, 31);

    manager.delete::<User, _, _>(["ada@example.com"]).unwrap();
    assert_eq!(users.get(["ada@example.com"]).unwrap(), None);
}

#[test]
fn transactional_writes_only_invalidate() {
    let registry = memory_registry();
    let manager = registry.manager();
    let users = manager.cache::<User>().unwrap();
    manager.create(User::named("ada")).unwrap();

    let txn = manager.begin().unwrap();
    manager
        .patch::<User, _, _>(["ada@example.com"], Record::new().with("age", 50))
        .unwrap();
    assert_eq!(users.count(), 0);
    manager.rollback(&txn).unwrap();

    let ada: User = manager.fetch(["ada@example.com"]).unwrap();
    assert_eq!(ada.age, 30);
}

#[test]
fn non_cacheable_types_bypass_the_cache() {
    let registry = memory_registry();
    let manager = registry.manager();
    let events = manager.cache::<AuditEvent>().unwrap();

    let event = manager.create(AuditEvent::of("login", "ada")).unwrap();
    assert!(!events.handle().is_enabled());
    assert_eq!(events.count(), 0);
    assert_eq!(events.get_by_id(event.id).unwrap(), None);
}

#[test]
fn malformed_keys_fail_even_without_a_cache() {
    let registry = memory_registry();
    let manager = registry.manager();
    let events = manager.cache::<AuditEvent>().unwrap();
    let users = manager.cache::<User>().unwrap();

    assert!(matches!(
        events.get(["no primary key"]),
        Err(CoreError::UnsupportedOperation { .. })
    ));
    assert!(matches!(
        users.get_by_alternate("by_nickname", ["x"]),
        Err(CoreError::InvalidArgument { .. })
    ));
}
