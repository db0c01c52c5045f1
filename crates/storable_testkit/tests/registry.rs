//! Registry activation, configuration loading and pre-backend checks.

use std::sync::Arc;
use std::time::Duration;
use storable_core::{
    BackendRegistry, CacheLevel, CoreError, MemoryBackend, ProviderConfig, Record, RegistryConfig, StorageBackend,
    UnitConfig,
};
use storable_testkit::prelude::*;

const CONFIG_JSON: &str = r#"{
    "caches": [
        { "id": "hot", "max_entries": 2, "eviction": "lru" },
        { "id": "scratch", "level": "local" }
    ],
    "default_cache": "hot",
    "entity_caches": { "Session": "scratch" },
    "units": [
        {
            "name": "main",
            "default": true,
            "providers": [ { "name": "primary" } ]
        }
    ],
    "shutdown_grace_ms": 250
}"#;

#[test]
fn config_loads_from_json() {
    let config: RegistryConfig = serde_json::from_str(CONFIG_JSON).unwrap();
    config.validate().unwrap();
    assert_eq!(config.caches.len(), 2);
    assert_eq!(config.caches[0].max_entries, Some(2));
    assert_eq!(config.caches[1].level, CacheLevel::Local);
    assert_eq!(config.shutdown_grace_duration(), Duration::from_millis(250));
    assert_eq!(config.default_unit().map(|u| u.name.as_str()), Some(UNIT));

    let registry = with_fixture_types(BackendRegistry::builder(config))
        .backend(UNIT, Arc::new(MemoryBackend::new(PRIMARY)))
        .build();
    registry.activate().unwrap();

    let manager = registry.manager().unwrap();
    let sessions = manager.cache::<Session>().unwrap();
    assert_eq!(sessions.handle().cache_id(), Some("scratch"));
    let users = manager.cache::<User>().unwrap();
    assert_eq!(users.handle().cache_id(), Some("hot"));

    for handle in ["a", "b", "c"] {
        manager.create(User::named(handle)).unwrap();
    }
    assert_eq!(users.count(), 2);
    assert_eq!(manager.count::<User>().unwrap(), 3);
}

#[test]
fn invalid_json_config_is_rejected_by_validation() {
    let config: RegistryConfig = serde_json::from_str(
        r#"{ "default_cache": "missing", "units": [ { "name": "main" } ] }"#,
    )
    .unwrap();
    assert!(matches!(config.validate(), Err(CoreError::Configuration { .. })));

    let registry = BackendRegistry::builder(config).build();
    assert!(matches!(registry.activate(), Err(CoreError::Configuration { .. })));
    assert!(!registry.is_active());
}

#[test]
fn failed_activation_shuts_down_what_started() {
    let config = RegistryConfig::new().unit(
        UnitConfig::new(UNIT)
            .default_unit()
            .provider(ProviderConfig::new(PRIMARY))
            .provider(ProviderConfig::new(REPLICA).read_only()),
    );
    let primary = Arc::new(MemoryBackend::new(PRIMARY));
    let replica = Arc::new(FailingBackend::new(REPLICA));
    replica.fail(FailPoint::Activate, CoreError::configuration("replica unreachable"));

    let registry = with_fixture_types(BackendRegistry::builder(config))
        .backend(UNIT, Arc::clone(&primary) as Arc<dyn StorageBackend>)
        .backend(UNIT, Arc::clone(&replica) as Arc<dyn StorageBackend>)
        .build();

    let err = registry.activate().unwrap_err();
    assert_eq!(err, CoreError::configuration("replica unreachable"));
    assert!(!registry.is_active());
    assert!(!primary.is_active());
    assert_eq!(replica.shutdown_calls(), 0);
    assert!(matches!(registry.manager(), Err(CoreError::IllegalState { .. })));

    replica.heal(FailPoint::Activate);
    registry.activate().unwrap();
    assert!(primary.is_active() && replica.is_active());
}

#[test]
fn shutdown_reaches_every_backend_and_reports_the_first_error() {
    let config = RegistryConfig::new().unit(
        UnitConfig::new(UNIT)
            .default_unit()
            .provider(ProviderConfig::new(PRIMARY))
            .provider(ProviderConfig::new(REPLICA).read_only()),
    );
    let primary = Arc::new(FailingBackend::new(PRIMARY));
    let replica = Arc::new(FailingBackend::new(REPLICA));
    let registry = with_fixture_types(BackendRegistry::builder(config))
        .backend(UNIT, Arc::clone(&primary) as Arc<dyn StorageBackend>)
        .backend(UNIT, Arc::clone(&replica) as Arc<dyn StorageBackend>)
        .build();
    registry.activate().unwrap();
    let manager = registry.manager().unwrap();

    replica.fail(FailPoint::Shutdown, CoreError::timeout("replica stuck"));
    let err = registry.shutdown(Duration::ZERO).unwrap_err();
    assert_eq!(err, CoreError::timeout("replica stuck"));
    assert_eq!(primary.shutdown_calls(), 1);
    assert_eq!(replica.shutdown_calls(), 1);
    assert!(!registry.is_active());

    assert!(matches!(manager.count::<User>(), Err(CoreError::IllegalState { .. })));
    assert!(matches!(
        registry.shutdown(Duration::ZERO),
        Err(CoreError::IllegalState { .. })
    ));
}

#[test]
fn unknown_units_are_invalid_arguments() {
    let registry = memory_registry();
    assert!(matches!(
        registry.manager_for("archive"),
        Err(CoreError::InvalidArgument { .. })
    ));
    assert_eq!(registry.manager_for(UNIT).unwrap().unit(), UNIT);
}

#[test]
fn rejected_operations_never_reach_the_backend() {
    let spy = Arc::new(RecordingBackend::new(Arc::new(MemoryBackend::new(PRIMARY))));
    let registry = with_fixture_types(BackendRegistry::builder(memory_config()))
        .backend(UNIT, Arc::clone(&spy) as Arc<dyn StorageBackend>)
        .build();
    registry.activate().unwrap();
    let manager = registry.manager().unwrap();

    let event = manager.create(AuditEvent::of("login", "ada")).unwrap();
    spy.clear();

    // Immutable type.
    assert!(manager.update_by_id(event.clone()).is_err());
    assert!(manager
        .patch_by_id::<AuditEvent>(event.id, Record::new().with("detail", "x"))
        .is_err());
    assert!(manager.touch_by_id::<AuditEvent>(event.id).is_err());
    assert!(manager.save(event.clone()).is_err());

    // Key shape.
    assert!(manager.fetch::<User, _, _>(["a", "b"]).is_err());
    assert!(manager.fetch_by_alternate::<User, _, _>("by_nickname", ["a"]).is_err());
    assert!(manager.fetch_by_id::<User>(storable_core::Value::Null).is_err());

    // Unknown fields and not-null elements.
    assert!(manager
        .patch::<User, _, _>(["ada@example.com"], Record::new().with("shoe_size", 9))
        .is_err());
    assert!(manager.create(AuditEvent::default()).is_err());

    assert!(spy.calls().is_empty(), "unexpected backend calls: {:?}", spy.calls());

    let _: AuditEvent = manager.fetch_by_id(event.id).unwrap();
    assert_eq!(spy.calls_to("fetch"), 1);
}
