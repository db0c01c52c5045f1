//! Transaction binding and exclusivity.

use std::sync::Arc;
use storable_core::{BackendRegistry, CoreError, StorageBackend, TransactionState};
use storable_testkit::prelude::*;

fn failing_registry() -> (BackendRegistry, Arc<FailingBackend>) {
    let backend = Arc::new(FailingBackend::new(PRIMARY));
    let registry = with_fixture_types(BackendRegistry::builder(memory_config()))
        .backend(UNIT, Arc::clone(&backend) as Arc<dyn StorageBackend>)
        .build();
    registry.activate().unwrap();
    (registry, backend)
}

#[test]
fn only_one_transaction_per_manager_under_contention() {
    let registry = memory_registry();
    let manager = Arc::new(registry.manager());
    let config = StressConfig {
        operations: 400,
        threads: 8,
        ..StressConfig::default()
    };

    let result = stress_transaction_contention(Arc::clone(&manager), &config);
    assert_eq!(result.max_concurrent, 1);
    assert_eq!(result.errors, 0);
    assert!(result.begun >= 1);
    assert_eq!(result.begun + result.refused, 400);
    assert!(manager.current_transaction().is_none());
}

#[test]
fn managers_transact_independently() {
    let registry = memory_registry();
    let a = registry.manager();
    let b = registry.manager();

    let ta = a.begin().unwrap();
    let tb = b.begin().unwrap();
    assert_ne!(ta.id(), tb.id());

    a.create(User::named("ada")).unwrap();
    b.create(User::named("bob")).unwrap();
    a.commit(&ta).unwrap();
    b.rollback(&tb).unwrap();

    assert_eq!(a.count::<User>().unwrap(), 1);
    assert_eq!(registry.primary.open_transactions(), 0);
}

#[test]
fn ended_transactions_cannot_be_ended_again() {
    let registry = memory_registry();
    let manager = registry.manager();

    let txn = manager.begin().unwrap();
    manager.commit(&txn).unwrap();
    assert_eq!(txn.state(), TransactionState::Committed);

    assert!(matches!(manager.commit(&txn), Err(CoreError::IllegalState { .. })));
    assert!(matches!(manager.rollback(&txn), Err(CoreError::IllegalState { .. })));
}

#[test]
fn a_foreign_transaction_is_rejected() {
    let registry = memory_registry();
    let a = registry.manager();
    let b = registry.manager();

    let ta = a.begin().unwrap();
    let tb = b.begin().unwrap();
    assert!(matches!(a.commit(&tb), Err(CoreError::IllegalState { .. })));

    // Both are still usable by their owners.
    a.commit(&ta).unwrap();
    b.commit(&tb).unwrap();
}

#[test]
fn failed_commit_unbinds_and_reports_a_transaction_error() {
    let (registry, backend) = failing_registry();
    let manager = registry.manager().unwrap();

    let txn = manager.begin().unwrap();
    manager.create(User::named("ada")).unwrap();
    backend.fail(FailPoint::Commit, CoreError::illegal_state("disk detached"));

    let err = manager.commit(&txn).unwrap_err();
    assert!(matches!(err, CoreError::Transaction { .. }));
    assert_eq!(txn.state(), TransactionState::Failed);
    assert!(manager.current_transaction().is_none());
    assert_eq!(manager.count::<User>().unwrap(), 0);

    backend.heal(FailPoint::Commit);
    let again = manager.begin().unwrap();
    manager.commit(&again).unwrap();
}

#[test]
fn failed_begin_leaves_the_manager_usable() {
    let (registry, backend) = failing_registry();
    let manager = registry.manager().unwrap();

    backend.fail(FailPoint::Begin, CoreError::not_enough_resource("no connections"));
    let err = manager.begin().unwrap_err();
    assert!(err.is_transient());
    assert!(manager.current_transaction().is_none());

    backend.heal(FailPoint::Begin);
    let txn = manager.begin().unwrap();
    manager.rollback(&txn).unwrap();
}

#[test]
fn closing_rolls_back_the_open_transaction() {
    let registry = memory_registry();
    let manager = registry.manager();

    let _txn = manager.begin().unwrap();
    manager.create(User::named("ada")).unwrap();
    manager.close();

    assert!(!manager.is_open());
    assert_eq!(registry.primary.open_transactions(), 0);
    assert_eq!(registry.manager().count::<User>().unwrap(), 0);
    assert!(matches!(manager.begin(), Err(CoreError::IllegalState { .. })));
}

#[test]
fn failed_rollback_still_ends_the_transaction() {
    let (registry, backend) = failing_registry();
    let manager = registry.manager().unwrap();

    let txn = manager.begin().unwrap();
    manager.create(User::named("ada")).unwrap();
    backend.fail(FailPoint::Rollback, CoreError::illegal_state("connection reset"));

    let err = manager.rollback(&txn).unwrap_err();
    assert!(matches!(err, CoreError::Transaction { .. }));
    assert_eq!(txn.state(), TransactionState::Failed);
    assert!(manager.current_transaction().is_none());
    assert!(matches!(manager.commit(&txn), Err(CoreError::IllegalState { .. })));
    assert!(matches!(manager.rollback(&txn), Err(CoreError::IllegalState { .. })));

    let next = manager.begin().unwrap();
    assert_ne!(next.id(), txn.id());
    manager.commit(&next).unwrap();
    assert_eq!(manager.count::<User>().unwrap(), 0);
}

#[test]
fn close_swallows_a_failed_rollback() {
    let (registry, backend) = failing_registry();
    let manager = registry.manager().unwrap();

    let txn = manager.begin().unwrap();
    manager.create(User::named("ada")).unwrap();
    backend.fail(FailPoint::Rollback, CoreError::timeout("rollback stuck"));

    manager.close();
    assert!(!manager.is_open());
    assert_eq!(txn.state(), TransactionState::Failed);
    assert!(manager.current_transaction().is_none());
    assert_eq!(backend.inner().open_transactions(), 0);

    backend.heal(FailPoint::Rollback);
    assert_eq!(registry.manager().unwrap().count::<User>().unwrap(), 0);
}

#[test]
fn a_stale_handle_never_unbinds_the_next_transaction() {
    let registry = memory_registry();
    let manager = registry.manager();

    let first = manager.begin().unwrap();
    manager.commit(&first).unwrap();
    let second = manager.begin().unwrap();

    assert!(matches!(manager.commit(&first), Err(CoreError::IllegalState { .. })));
    assert!(matches!(manager.rollback(&first), Err(CoreError::IllegalState { .. })));
    assert_eq!(
        manager.current_transaction().map(|t| t.id().to_string()),
        Some(second.id().to_string())
    );

    manager.create(User::named("ada")).unwrap();
    assert_eq!(registry.manager().count::<User>().unwrap(), 0);
    manager.commit(&second).unwrap();
    assert_eq!(registry.manager().count::<User>().unwrap(), 1);
}

#[test]
fn racing_ends_finish_a_transaction_exactly_once() {
    let registry = memory_registry();
    let manager = registry.manager();
    let manager = &manager;

    for _ in 0..50 {
        let txn = manager.begin().unwrap();
        let (ended, next) = std::thread::scope(|s| {
            let enders: Vec<_> = (0..4)
                .map(|i| {
                    let txn = Arc::clone(&txn);
                    s.spawn(move || {
                        if i % 2 == 0 {
                            manager.commit(&txn)
                        } else {
                            manager.rollback(&txn)
                        }
                    })
                })
                .collect();
            let beginner = s.spawn(move || loop {
                match manager.begin() {
                    Ok(next) => break next,
                    Err(CoreError::IllegalState { .. }) => std::thread::yield_now(),
                    Err(e) => panic!("unexpected begin error: {e}"),
                }
            });
            let ended: Vec<_> = enders.into_iter().map(|h| h.join().unwrap()).collect();
            (ended, beginner.join().unwrap())
        });

        assert_eq!(ended.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(ended
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, CoreError::IllegalState { .. })));
        assert_eq!(
            manager.current_transaction().map(|t| t.id().to_string()),
            Some(next.id().to_string())
        );
        manager.rollback(&next).unwrap();
    }
    assert_eq!(registry.primary.open_transactions(), 0);
}
