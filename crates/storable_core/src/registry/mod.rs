//! Backend registry: wires storage units, providers and caches together.
//!
//! This module provides:
//! - [`RegistryConfig`]: the topology, deserializable from any serde format
//! - [`BackendRegistry`]: activates backends and caches and hands out managers
//! - [`BackendSelector`]: how a manager picks among equivalent providers

mod config;
mod selector;
mod topology;

pub use config::{ProviderConfig, RegistryConfig, UnitConfig};
pub use selector::{AccessMode, BackendSelector, RandomSelector, RoundRobinSelector};

pub(crate) use topology::{CacheAttachment, Unit};

use crate::backend::StorageBackend;
use crate::cache::{CacheDefinition, CacheLevel, CacheStore, MemoryCacheStore};
use crate::error::{CoreError, CoreResult};
use crate::manager::{DefaultKeyGenerator, KeyGenerator, Manager, ManagerContext};
use crate::metadata::{DescriptorCache, Entity, EntityDescriptor};
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use topology::Topology;
use tracing::{debug, info, warn};

/// Creates the store behind a cache definition.
pub type CacheStoreFactory = Arc<dyn Fn(&CacheDefinition) -> Arc<dyn CacheStore> + Send + Sync>;

type Describe = fn(&DescriptorCache) -> CoreResult<Arc<EntityDescriptor>>;

fn describe_as<T: Entity>(cache: &DescriptorCache) -> CoreResult<Arc<EntityDescriptor>> {
    cache.describe::<T>()
}

/// A type registered with [`RegistryBuilder::entity`].
#[derive(Clone, Copy)]
struct ManagedType {
    type_id: TypeId,
    type_name: &'static str,
    describe: Describe,
}

impl fmt::Debug for ManagedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

const INACTIVE: u8 = 0;
const ACTIVATING: u8 = 1;
const ACTIVE: u8 = 2;
const SHUTTING_DOWN: u8 = 3;

/// Builder for [`BackendRegistry`].
#[must_use]
pub struct RegistryBuilder {
    config: RegistryConfig,
    types: Vec<ManagedType>,
    bindings: Vec<(String, Arc<dyn StorageBackend>)>,
    selector: Arc<dyn BackendSelector>,
    key_generator: Arc<dyn KeyGenerator>,
    store_factory: CacheStoreFactory,
}

impl RegistryBuilder {
    /// Registers a managed entity type.
    pub fn entity<T: Entity>(mut self) -> Self {
        let type_id = TypeId::of::<T>();
        if !self.types.iter().any(|t| t.type_id == type_id) {
            self.types.push(ManagedType {
                type_id,
                type_name: std::any::type_name::<T>(),
                describe: describe_as::<T>,
            });
        }
        self
    }

    /// Binds a backend to the provider of `unit` named after the backend.
    pub fn backend(mut self, unit: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        self.bindings.push((unit.into(), backend));
        self
    }

    /// Replaces the backend selector. Defaults to [`RandomSelector`].
    pub fn selector(mut self, selector: Arc<dyn BackendSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Replaces the surrogate key generator.
    pub fn key_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = generator;
        self
    }

    /// Replaces the cache store factory. Defaults to [`MemoryCacheStore`].
    pub fn cache_store<F>(mut self, factory: F) -> Self
    where
        F: Fn(&CacheDefinition) -> Arc<dyn CacheStore> + Send + Sync + 'static,
    {
        self.store_factory = Arc::new(factory);
        self
    }

    /// Builds an inactive registry.
    #[must_use]
    pub fn build(self) -> BackendRegistry {
        BackendRegistry {
            config: self.config,
            types: self.types,
            bindings: self.bindings,
            selector: self.selector,
            key_generator: self.key_generator,
            store_factory: self.store_factory,
            descriptors: Arc::new(DescriptorCache::new()),
            state: AtomicU8::new(INACTIVE),
            topology: RwLock::new(None),
        }
    }
}

/// Owns every backend and cache of an application and creates managers.
///
/// # Lifecycle
///
/// A registry is built inactive. [`activate`](Self::activate) creates the
/// shared caches, describes every managed type, resolves which cache each
/// entity uses behind each provider and activates the backends in
/// configuration order. If any step fails, the backends already activated
/// are shut down again and the registry stays inactive.
///
/// [`shutdown`](Self::shutdown) deactivates everything; managers created
/// before it fail with `IllegalState` from then on.
///
/// # Example
///
/// ```rust,ignore
/// let registry = BackendRegistry::builder(config)
///     .entity::<User>()
///     .backend("main", Arc::new(MemoryBackend::new("primary")))
///     .build();
/// registry.activate()?;
///
/// let manager = registry.manager()?;
/// let user = manager.create(User::named("ada"))?;
/// ```
pub struct BackendRegistry {
    /// Topology to activate.
    config: RegistryConfig,
    /// Managed types, in registration order.
    types: Vec<ManagedType>,
    /// (unit, backend) bindings.
    bindings: Vec<(String, Arc<dyn StorageBackend>)>,
    /// Provider choice for managers.
    selector: Arc<dyn BackendSelector>,
    /// Surrogate key generation for managers.
    key_generator: Arc<dyn KeyGenerator>,
    /// Creates cache stores.
    store_factory: CacheStoreFactory,
    /// Descriptor memo shared with managers.
    descriptors: Arc<DescriptorCache>,
    /// Lifecycle state.
    state: AtomicU8,
    /// Present while active.
    topology: RwLock<Option<Arc<Topology>>>,
}

impl BackendRegistry {
    /// Starts building a registry for `config`.
    pub fn builder(config: RegistryConfig) -> RegistryBuilder {
        RegistryBuilder {
            config,
            types: Vec::new(),
            bindings: Vec::new(),
            selector: Arc::new(RandomSelector),
            key_generator: Arc::new(DefaultKeyGenerator::new()),
            store_factory: Arc::new(|definition: &CacheDefinition| {
                Arc::new(MemoryCacheStore::new(definition.clone())) as Arc<dyn CacheStore>
            }),
        }
    }

    /// The configuration the registry was built with.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The descriptor memo.
    #[must_use]
    pub fn descriptors(&self) -> &Arc<DescriptorCache> {
        &self.descriptors
    }

    /// Returns true once `activate` succeeded and until `shutdown`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ACTIVE
    }

    /// Activates caches and backends.
    ///
    /// # Errors
    ///
    /// - `IllegalState` if the registry is active or being activated
    /// - `Configuration` for invalid topology or unbound providers
    /// - `InvalidEntityType` if a managed type cannot be described
    /// - whatever a backend's `activate` returns
    pub fn activate(&self) -> CoreResult<()> {
        if self
            .state
            .compare_exchange(INACTIVE, ACTIVATING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::illegal_state("backend registry is already active"));
        }
        info!(units = self.config.units.len(), types = self.types.len(), "activating backend registry");

        let mut activated = Vec::new();
        match self.try_activate(&mut activated) {
            Ok(topology) => {
                *self.topology.write() = Some(Arc::new(topology));
                self.state.store(ACTIVE, Ordering::SeqCst);
                info!(backends = activated.len(), "backend registry active");
                Ok(())
            }
            Err(e) => {
                self.abort_activation(&activated, &e);
                Err(e)
            }
        }
    }

    fn try_activate(&self, activated: &mut Vec<Arc<dyn StorageBackend>>) -> CoreResult<Topology> {
        self.config.validate()?;
        let bindings = self.resolve_bindings()?;

        let definitions: HashMap<String, CacheDefinition> = self
            .config
            .caches
            .iter()
            .map(|d| (d.id.clone(), d.clone()))
            .collect();
        let shared: HashMap<String, Arc<dyn CacheStore>> = self
            .config
            .caches
            .iter()
            .filter(|d| d.level == CacheLevel::Shared)
            .map(|d| (d.id.clone(), (self.store_factory)(d)))
            .collect();

        let mut managed = HashMap::new();
        for managed_type in &self.types {
            let descriptor = (managed_type.describe)(&self.descriptors)?;
            debug!(entity = descriptor.name(), rust_type = managed_type.type_name, "described managed type");
            managed.insert(managed_type.type_id, descriptor);
        }

        let live = Arc::new(AtomicBool::new(true));
        let mut units = HashMap::new();
        let mut backends = Vec::new();
        for unit_config in &self.config.units {
            let mut unit = Unit {
                name: unit_config.name.clone(),
                read_write: Vec::new(),
                read_only: Vec::new(),
                managed: managed.clone(),
                attachments: HashMap::new(),
                live: Arc::clone(&live),
            };
            for provider in &unit_config.providers {
                let backend = bindings.get(provider.name.as_str()).ok_or_else(|| {
                    CoreError::configuration(format!(
                        "provider {} of unit {} has no backend",
                        provider.name, unit_config.name
                    ))
                })?;
                for (type_id, descriptor) in &managed {
                    if let Some(id) =
                        topology::resolve_cache_id(&self.config, unit_config, provider, descriptor)
                    {
                        let attachment = topology::attach(id, &definitions, &shared)?;
                        debug!(
                            provider = %provider.name,
                            entity = descriptor.name(),
                            cache = id,
                            "cache attached"
                        );
                        unit.attachments
                            .insert((provider.name.clone(), *type_id), attachment);
                    }
                }
                if provider.read_only {
                    unit.read_only.push(Arc::clone(backend));
                } else {
                    unit.read_write.push(Arc::clone(backend));
                }
                backends.push(Arc::clone(backend));
            }
            units.insert(unit.name.clone(), Arc::new(unit));
        }

        for backend in &backends {
            backend.activate()?;
            activated.push(Arc::clone(backend));
            info!(backend = backend.name(), "backend activated");
        }

        Ok(Topology {
            units,
            default_unit: self.config.default_unit().map(|u| u.name.clone()),
            backends,
            shared_caches: shared.into_values().collect(),
            live,
        })
    }

    /// Maps provider names to bound backends, checking every binding.
    fn resolve_bindings(&self) -> CoreResult<HashMap<&str, &Arc<dyn StorageBackend>>> {
        let mut bindings = HashMap::new();
        for (unit, backend) in &self.bindings {
            let known = self.config.find_unit(unit).is_some_and(|u| {
                u.providers.iter().any(|p| p.name == backend.name())
            });
            if !known {
                return Err(CoreError::configuration(format!(
                    "backend {} is not a provider of unit {unit}",
                    backend.name()
                )));
            }
            if bindings.insert(backend.name(), backend).is_some() {
                return Err(CoreError::configuration(format!(
                    "provider {} is bound twice",
                    backend.name()
                )));
            }
        }
        Ok(bindings)
    }

    /// Undoes a failed activation. Cleanup failures are logged, not raised.
    fn abort_activation(&self, activated: &[Arc<dyn StorageBackend>], cause: &CoreError) {
        warn!(error = %cause, "backend registry activation failed");
        let grace = self.config.shutdown_grace_duration();
        for backend in activated.iter().rev() {
            if let Err(e) = backend.shutdown(grace) {
                warn!(backend = backend.name(), error = %e, "shutdown after failed activation failed");
            }
        }
        *self.topology.write() = None;
        self.state.store(INACTIVE, Ordering::SeqCst);
    }

    /// Shuts every backend down and drops the caches.
    ///
    /// Every backend is asked to shut down even if an earlier one fails;
    /// the first failure is returned.
    ///
    /// # Errors
    ///
    /// `IllegalState` if the registry is not active, or the first backend
    /// shutdown error.
    pub fn shutdown(&self, grace: Duration) -> CoreResult<()> {
        if self
            .state
            .compare_exchange(ACTIVE, SHUTTING_DOWN, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::illegal_state("backend registry is not active"));
        }
        let topology = self.topology.write().take();
        let mut first_error = None;
        if let Some(topology) = topology {
            topology.live.store(false, Ordering::SeqCst);
            for backend in topology.backends.iter().rev() {
                match backend.shutdown(grace) {
                    Ok(()) => info!(backend = backend.name(), "backend shut down"),
                    Err(e) => {
                        warn!(backend = backend.name(), error = %e, "backend shutdown failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
            for cache in &topology.shared_caches {
                cache.clear();
            }
        }
        self.state.store(INACTIVE, Ordering::SeqCst);
        info!("backend registry shut down");
        first_error.map_or(Ok(()), Err)
    }

    /// Creates a manager for the default storage unit.
    ///
    /// # Errors
    ///
    /// `IllegalState` if the registry is not active, `Configuration` if no
    /// unit is the default.
    pub fn manager(&self) -> CoreResult<Manager> {
        let topology = self.active_topology()?;
        let name = topology
            .default_unit
            .as_deref()
            .ok_or_else(|| CoreError::configuration("no default storage unit"))?;
        self.manager_in(&topology, name)
    }

    /// Creates a manager for a named storage unit.
    ///
    /// # Errors
    ///
    /// `IllegalState` if the registry is not active, `InvalidArgument` for
    /// an unknown unit.
    pub fn manager_for(&self, unit: &str) -> CoreResult<Manager> {
        let topology = self.active_topology()?;
        self.manager_in(&topology, unit)
    }

    fn active_topology(&self) -> CoreResult<Arc<Topology>> {
        if !self.is_active() {
            return Err(CoreError::illegal_state("backend registry is not active"));
        }
        self.topology
            .read()
            .clone()
            .ok_or_else(|| CoreError::illegal_state("backend registry is not active"))
    }

    fn manager_in(&self, topology: &Topology, unit: &str) -> CoreResult<Manager> {
        let unit = topology
            .units
            .get(unit)
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown storage unit '{unit}'")))?;
        Ok(Manager::new(ManagerContext {
            unit: Arc::clone(unit),
            descriptors: Arc::clone(&self.descriptors),
            selector: Arc::clone(&self.selector),
            key_generator: Arc::clone(&self.key_generator),
            store_factory: Arc::clone(&self.store_factory),
        }))
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("is_active", &self.is_active())
            .field("types", &self.types)
            .field("units", &self.config.units.len())
            .finish_non_exhaustive()
    }
}

impl Drop for BackendRegistry {
    fn drop(&mut self) {
        if self.is_active() {
            let _ = self.shutdown(self.config.shutdown_grace_duration());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::test_entities::{Item, Tag, Unmarked};

    fn config() -> RegistryConfig {
        RegistryConfig::new()
            .cache(CacheDefinition::new("shared"))
            .unit(
                UnitConfig::new("main")
                    .default_unit()
                    .cache("shared")
                    .provider(ProviderConfig::new("primary")),
            )
    }

    fn registry(backend: &Arc<MemoryBackend>) -> BackendRegistry {
        BackendRegistry::builder(config())
            .entity::<Item>()
            .entity::<Tag>()
            .backend("main", Arc::clone(backend) as Arc<dyn StorageBackend>)
            .build()
    }

    #[test]
    fn activate_and_shutdown() {
        let backend = Arc::new(MemoryBackend::new("primary"));
        let registry = registry(&backend);
        assert!(!registry.is_active());
        assert!(registry.manager().is_err());

        registry.activate().unwrap();
        assert!(registry.is_active());
        assert!(backend.is_active());
        assert_eq!(registry.descriptors().len(), 2);

        registry.shutdown(Duration::from_millis(10)).unwrap();
        assert!(!registry.is_active());
        assert!(!backend.is_active());
    }

    #[test]
    fn activate_twice_fails() {
        let registry = registry(&Arc::new(MemoryBackend::new("primary")));
        registry.activate().unwrap();
        assert!(matches!(
            registry.activate(),
            Err(CoreError::IllegalState { .. })
        ));
    }

    #[test]
    fn unbound_provider_is_a_configuration_error() {
        let registry = BackendRegistry::builder(config()).entity::<Item>().build();
        assert!(matches!(
            registry.activate(),
            Err(CoreError::Configuration { .. })
        ));
        assert!(!registry.is_active());
    }

    #[test]
    fn unknown_binding_is_a_configuration_error() {
        let registry = BackendRegistry::builder(config())
            .backend("main", Arc::new(MemoryBackend::new("primary")))
            .backend("main", Arc::new(MemoryBackend::new("stray")))
            .build();
        assert!(matches!(
            registry.activate(),
            Err(CoreError::Configuration { .. })
        ));
    }

    #[test]
    fn bad_entity_aborts_activation() {
        let backend = Arc::new(MemoryBackend::new("primary"));
        let registry = BackendRegistry::builder(config())
            .entity::<Unmarked>()
            .backend("main", Arc::clone(&backend) as Arc<dyn StorageBackend>)
            .build();
        assert!(matches!(
            registry.activate(),
            Err(CoreError::InvalidEntityType { .. })
        ));
        assert!(!backend.is_active());
        assert!(!registry.is_active());
    }

    #[test]
    fn managers_by_unit() {
        let registry = registry(&Arc::new(MemoryBackend::new("primary")));
        registry.activate().unwrap();
        assert!(registry.manager().is_ok());
        assert!(registry.manager_for("main").is_ok());
        assert!(matches!(
            registry.manager_for("other"),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn shutdown_invalidates_managers() {
        let registry = registry(&Arc::new(MemoryBackend::new("primary")));
        registry.activate().unwrap();
        let manager = registry.manager().unwrap();
        registry.shutdown(Duration::ZERO).unwrap();
        assert!(matches!(
            manager.count::<Item>(),
            Err(CoreError::IllegalState { .. })
        ));
    }

    #[test]
    fn shared_cache_is_seen_by_every_manager() {
        let registry = registry(&Arc::new(MemoryBackend::new("primary")));
        registry.activate().unwrap();
        let a = registry.manager().unwrap();
        let b = registry.manager().unwrap();
        let created = a
            .create(Item {
                sku: Some("sku-1".into()),
                ..Item::default()
            })
            .unwrap();
        let cache = b.cache::<Item>().unwrap();
        assert!(cache.contains(["sku-1"]).unwrap());
        assert_eq!(cache.get_by_id(created.id.clone()).unwrap().unwrap().id, created.id);
    }

    #[test]
    fn units_on_one_cache_pool_stay_apart() {
        let config = RegistryConfig::new()
            .cache(CacheDefinition::new("main"))
            .default_cache("main")
            .unit(UnitConfig::new("a").provider(ProviderConfig::new("pa")))
            .unit(UnitConfig::new("b").provider(ProviderConfig::new("pb")));
        let registry = BackendRegistry::builder(config)
            .entity::<Item>()
            .backend("a", Arc::new(MemoryBackend::new("pa")))
            .backend("b", Arc::new(MemoryBackend::new("pb")))
            .build();
        registry.activate().unwrap();
        let ma = registry.manager_for("a").unwrap();
        let mb = registry.manager_for("b").unwrap();

        let created = ma
            .create(Item {
                sku: Some("x".into()),
                ..Item::default()
            })
            .unwrap();
        assert_eq!(ma.cache::<Item>().unwrap().count(), 1);
        assert_eq!(mb.cache::<Item>().unwrap().count(), 0);
        assert!(matches!(
            mb.fetch_by_id::<Item>(created.id.clone()),
            Err(CoreError::NotFound { .. })
        ));
        assert!(!mb.contains::<Item, _, _>(["x"]).unwrap());
        assert_eq!(mb.count::<Item>().unwrap(), 0);
    }

    #[test]
    fn local_caches_are_per_manager() {
        let config = RegistryConfig::new()
            .cache(CacheDefinition::new("local").level(CacheLevel::Local))
            .unit(
                UnitConfig::new("main")
                    .cache("local")
                    .provider(ProviderConfig::new("primary")),
            );
        let registry = BackendRegistry::builder(config)
            .entity::<Item>()
            .backend("main", Arc::new(MemoryBackend::new("primary")))
            .build();
        registry.activate().unwrap();
        let a = registry.manager().unwrap();
        let b = registry.manager().unwrap();
        a.create(Item {
            sku: Some("sku-1".into()),
            ..Item::default()
        })
        .unwrap();
        assert!(a.cache::<Item>().unwrap().contains(["sku-1"]).unwrap());
        assert!(!b.cache::<Item>().unwrap().contains(["sku-1"]).unwrap());
    }
}
