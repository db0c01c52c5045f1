//! Sample entity types and ready-made registries.
//!
//! The entity types cover every key kind and every metadata role:
//!
//! | Type | Keys | Notable |
//! |------|------|---------|
//! | [`User`] | UUID text surrogate, `email` primary, `by_handle` alternate | created / modified stamps |
//! | [`Account`] | sequence surrogate, composite `(bank, number)` primary | schema `finance` |
//! | [`AuditEvent`] | `Uuid` surrogate | immutable, not-null `kind` |
//! | [`Session`] | UUID text surrogate, `token` primary | access / expiry / ttl |

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use storable_core::{
    BackendRegistry, CacheDefinition, CoreError, CoreResult, ElementMetadata, Entity, EntityMetadata,
    Manager, MemoryBackend, MetadataType, ProviderConfig, RegistryConfig, StorageBackend, UnitConfig,
    Value,
};
use uuid::Uuid;

fn no_field(entity: &str, name: &str) -> CoreError {
    CoreError::invalid_argument(format!("{entity} has no field {name}"))
}

/// Name of the unit every fixture registry configures.
pub const UNIT: &str = "main";
/// Name of the read-write provider.
pub const PRIMARY: &str = "primary";
/// Name of the read-only provider of [`replicated_registry`].
pub const REPLICA: &str = "replica";
/// Id of the shared cache every fixture type is attached to.
pub const SHARED_CACHE: &str = "shared";

/// A user account, addressed by email or handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    /// Generated surrogate key.
    pub id: Option<String>,
    /// Primary key.
    pub email: Option<String>,
    /// Alternate key `by_handle`.
    pub handle: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Age in years.
    pub age: i32,
    /// Creation time.
    pub created: Option<SystemTime>,
    /// Last modification time.
    pub modified: Option<SystemTime>,
}

impl User {
    /// A user with email `<handle>@example.com`.
    pub fn named(handle: &str) -> Self {
        Self {
            email: Some(format!("{handle}@example.com")),
            handle: Some(handle.to_string()),
            name: Some(handle.to_string()),
            age: 30,
            ..Self::default()
        }
    }
}

impl Entity for User {
    fn metadata() -> EntityMetadata {
        EntityMetadata::new("User")
            .schema("identity")
            .surrogate_key("id")
            .primary_key(["email"])
            .alternate_key("by_handle", ["handle"])
            .element(ElementMetadata::of::<Option<String>>("id"))
            .element(ElementMetadata::of::<Option<String>>("email").alias("mail"))
            .element(ElementMetadata::of::<Option<String>>("handle"))
            .element(ElementMetadata::of::<Option<String>>("name"))
            .element(ElementMetadata::of::<i32>("age"))
            .element(ElementMetadata::of::<Option<SystemTime>>("created").metadata(MetadataType::CreatedDate))
            .element(
                ElementMetadata::of::<Option<SystemTime>>("modified").metadata(MetadataType::LastModifiedDate),
            )
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "id" => self.id.clone().into(),
            "email" => self.email.clone().into(),
            "handle" => self.handle.clone().into(),
            "name" => self.name.clone().into(),
            "age" => self.age.into(),
            "created" => self.created.into(),
            "modified" => self.modified.into(),
            _ => return None,
        };
        Some(value)
    }

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
        match name {
            "id" => self.id = value.into_typed()?,
            "email" => self.email = value.into_typed()?,
            "handle" => self.handle = value.into_typed()?,
            "name" => self.name = value.into_typed()?,
            "age" => self.age = value.into_typed::<Option<i32>>()?.unwrap_or_default(),
            "created" => self.created = value.into_typed()?,
            "modified" => self.modified = value.into_typed()?,
            other => return Err(no_field("User", other)),
        }
        Ok(())
    }
}

/// A bank account with a composite primary key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Account {
    /// Sequence-generated surrogate key.
    pub id: Option<i64>,
    /// First primary key component.
    pub bank: Option<String>,
    /// Second primary key component.
    pub number: Option<i64>,
    /// Current balance.
    pub balance: f64,
    /// Owning user.
    pub owner: Option<Uuid>,
}

impl Account {
    /// An empty account.
    pub fn new(bank: &str, number: i64) -> Self {
        Self {
            bank: Some(bank.to_string()),
            number: Some(number),
            ..Self::default()
        }
    }
}

impl Entity for Account {
    fn metadata() -> EntityMetadata {
        EntityMetadata::new("Account")
            .schema("finance")
            .surrogate_key("id")
            .primary_key(["bank", "number"])
            .element(ElementMetadata::of::<Option<i64>>("id"))
            .element(ElementMetadata::of::<Option<String>>("bank").not_null())
            .element(ElementMetadata::of::<Option<i64>>("number").not_null())
            .element(ElementMetadata::of::<f64>("balance"))
            .element(ElementMetadata::of::<Option<Uuid>>("owner"))
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "id" => self.id.into(),
            "bank" => self.bank.clone().into(),
            "number" => self.number.into(),
            "balance" => self.balance.into(),
            "owner" => self.owner.into(),
            _ => return None,
        };
        Some(value)
    }

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
        match name {
            "id" => self.id = value.into_typed()?,
            "bank" => self.bank = value.into_typed()?,
            "number" => self.number = value.into_typed()?,
            "balance" => self.balance = value.into_typed::<Option<f64>>()?.unwrap_or_default(),
            "owner" => self.owner = value.into_typed()?,
            other => return Err(no_field("Account", other)),
        }
        Ok(())
    }
}

/// An append-only audit record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditEvent {
    /// Generated surrogate key.
    pub id: Option<Uuid>,
    /// What happened. Required.
    pub kind: Option<String>,
    /// Free-form details.
    pub detail: Option<String>,
    /// When it was recorded.
    pub at: Option<SystemTime>,
}

impl AuditEvent {
    /// An event of `kind`.
    pub fn of(kind: &str, detail: &str) -> Self {
        Self {
            kind: Some(kind.to_string()),
            detail: Some(detail.to_string()),
            ..Self::default()
        }
    }
}

impl Entity for AuditEvent {
    fn metadata() -> EntityMetadata {
        EntityMetadata::new("AuditEvent")
            .surrogate_key("id")
            .immutable()
            .cacheable(false)
            .element(ElementMetadata::of::<Option<Uuid>>("id"))
            .element(ElementMetadata::of::<Option<String>>("kind").not_null())
            .element(ElementMetadata::of::<Option<String>>("detail"))
            .element(ElementMetadata::of::<Option<SystemTime>>("at").metadata(MetadataType::CreatedDate))
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "id" => self.id.into(),
            "kind" => self.kind.clone().into(),
            "detail" => self.detail.clone().into(),
            "at" => self.at.into(),
            _ => return None,
        };
        Some(value)
    }

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
        match name {
            "id" => self.id = value.into_typed()?,
            "kind" => self.kind = value.into_typed()?,
            "detail" => self.detail = value.into_typed()?,
            "at" => self.at = value.into_typed()?,
            other => return Err(no_field("AuditEvent", other)),
        }
        Ok(())
    }
}

/// A login session that expires.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Generated surrogate key.
    pub id: Option<String>,
    /// Primary key.
    pub token: Option<String>,
    /// Owner's user id.
    pub user_id: Option<String>,
    /// Last access time.
    pub accessed: Option<SystemTime>,
    /// Expiry time.
    pub expires: Option<SystemTime>,
    /// Lifetime override in seconds.
    pub ttl: Option<i64>,
}

impl Session {
    /// Default session lifetime.
    pub const TTL: Duration = Duration::from_secs(30 * 60);

    /// A session for `user_id`.
    pub fn new(token: &str, user_id: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }
}

impl Entity for Session {
    fn metadata() -> EntityMetadata {
        EntityMetadata::new("Session")
            .surrogate_key("id")
            .primary_key(["token"])
            .ttl(Self::TTL)
            .element(ElementMetadata::of::<Option<String>>("id"))
            .element(ElementMetadata::of::<Option<String>>("token"))
            .element(ElementMetadata::of::<Option<String>>("user_id"))
            .element(ElementMetadata::of::<Option<SystemTime>>("accessed").metadata(MetadataType::LastAccessDate))
            .element(ElementMetadata::of::<Option<SystemTime>>("expires").metadata(MetadataType::Expires))
            .element(ElementMetadata::of::<Option<i64>>("ttl").metadata(MetadataType::Ttl))
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "id" => self.id.clone().into(),
            "token" => self.token.clone().into(),
            "user_id" => self.user_id.clone().into(),
            "accessed" => self.accessed.into(),
            "expires" => self.expires.into(),
            "ttl" => self.ttl.into(),
            _ => return None,
        };
        Some(value)
    }

    fn set_field(&mut self, name: &str, value: Value) -> CoreResult<()> {
        match name {
            "id" => self.id = value.into_typed()?,
            "token" => self.token = value.into_typed()?,
            "user_id" => self.user_id = value.into_typed()?,
            "accessed" => self.accessed = value.into_typed()?,
            "expires" => self.expires = value.into_typed()?,
            "ttl" => self.ttl = value.into_typed()?,
            other => return Err(no_field("Session", other)),
        }
        Ok(())
    }
}

/// One unit, one provider, one shared cache used by every cacheable type.
pub fn memory_config() -> RegistryConfig {
    RegistryConfig::new()
        .cache(CacheDefinition::new(SHARED_CACHE))
        .default_cache(SHARED_CACHE)
        .unit(UnitConfig::new(UNIT).default_unit().provider(ProviderConfig::new(PRIMARY)))
}

/// Registers every fixture type with a registry builder.
pub fn with_fixture_types(builder: storable_core::RegistryBuilder) -> storable_core::RegistryBuilder {
    builder
        .entity::<User>()
        .entity::<Account>()
        .entity::<AuditEvent>()
        .entity::<Session>()
}

/// An active registry over in-memory backends, with handles on them.
pub struct TestRegistry {
    /// The registry, shareable across threads.
    pub registry: Arc<BackendRegistry>,
    /// The read-write backend.
    pub primary: Arc<MemoryBackend>,
    /// The read-only backend, if configured.
    pub replica: Option<Arc<MemoryBackend>>,
}

impl TestRegistry {
    /// A manager for the default unit.
    pub fn manager(&self) -> Manager {
        self.registry.manager().expect("registry is active")
    }
}

impl std::ops::Deref for TestRegistry {
    type Target = BackendRegistry;

    fn deref(&self) -> &Self::Target {
        &self.registry
    }
}

/// An active registry of every fixture type over one [`MemoryBackend`].
pub fn memory_registry() -> TestRegistry {
    let primary = Arc::new(MemoryBackend::new(PRIMARY));
    let registry = with_fixture_types(BackendRegistry::builder(memory_config()))
        .backend(UNIT, Arc::clone(&primary) as Arc<dyn StorageBackend>)
        .build();
    registry.activate().expect("Failed to activate memory registry");
    TestRegistry {
        registry: Arc::new(registry),
        primary,
        replica: None,
    }
}

/// Like [`memory_registry`], plus a read-only replica serving the reads.
pub fn replicated_registry() -> TestRegistry {
    let config = RegistryConfig::new()
        .cache(CacheDefinition::new(SHARED_CACHE))
        .default_cache(SHARED_CACHE)
        .unit(
            UnitConfig::new(UNIT)
                .default_unit()
                .provider(ProviderConfig::new(PRIMARY))
                .provider(ProviderConfig::new(REPLICA).read_only()),
        );
    let primary = Arc::new(MemoryBackend::new(PRIMARY));
    let replica = Arc::new(MemoryBackend::replica_of(&primary, REPLICA));
    let registry = with_fixture_types(BackendRegistry::builder(config))
        .backend(UNIT, Arc::clone(&primary) as Arc<dyn StorageBackend>)
        .backend(UNIT, Arc::clone(&replica) as Arc<dyn StorageBackend>)
        .build();
    registry.activate().expect("Failed to activate replicated registry");
    TestRegistry {
        registry: Arc::new(registry),
        primary,
        replica: Some(replica),
    }
}

/// Runs a test with a manager over a fresh [`memory_registry`].
///
/// # Example
///
/// ```rust,ignore
/// use storable_testkit::{with_manager, User};
///
/// #[test]
/// fn my_test() {
///     with_manager(|manager| {
///         let user = manager.create(User::named("ada")).unwrap();
///         assert!(user.id.is_some());
///     });
/// }
/// ```
pub fn with_manager<F, R>(f: F) -> R
where
    F: FnOnce(&Manager) -> R,
{
    let registry = memory_registry();
    let manager = registry.manager();
    f(&manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storable_core::DescriptorCache;

    #[test]
    fn fixture_types_describe() {
        let cache = DescriptorCache::new();
        assert!(cache.describe::<User>().is_ok());
        assert!(cache.describe::<Account>().is_ok());
        assert!(cache.describe::<AuditEvent>().is_ok());
        assert!(cache.describe::<Session>().is_ok());
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn memory_registry_is_active() {
        let registry = memory_registry();
        assert!(registry.is_active());
        assert!(registry.primary.is_active());
    }

    #[test]
    fn replicated_registry_shares_data() {
        let registry = replicated_registry();
        let manager = registry.manager();
        manager.create(User::named("ada")).unwrap();
        let replica = registry.replica.as_ref().unwrap();
        assert_eq!(replica.row_count("User"), 1);
    }
}
